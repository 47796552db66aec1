use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use paddock::logging::{log, obj, v_num, v_str, Domain, Level};
use paddock::manager::PopulationManager;
use paddock::naming::{NameRegistrar, NameTables};
use paddock::notify::LogNotifier;
use paddock::rules::Rules;
use paddock::storage::{HorseStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    let rules = Rules::from_env();
    let store = Arc::new(SqliteStore::open(&rules.sqlite_path, &rules)?);

    let tables = match &rules.names_path {
        Some(path) => NameTables::load(Path::new(path))?,
        None => NameTables::builtin(),
    };
    let registrar = NameRegistrar::new(tables, &rules);

    let active = store.list_active()?.len();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&rules.sqlite_path)),
            ("names", v_str(rules.names_path.as_deref().unwrap_or("builtin"))),
            ("active_horses", v_num(active as f64)),
            ("schedule_target", v_num(rules.schedule_target() as f64)),
        ]),
    );

    let mut manager = PopulationManager::new(store, LogNotifier, registrar, rules)?;
    if active == 0 {
        // first run: the herd is bred before anything is scheduled
        let report = manager.maintain_population()?;
        log(
            Level::Info,
            Domain::Stable,
            "world_seeded",
            obj(&[("horses", v_num(report.wild.len() as f64))]),
        );
    }
    manager.run_forever().await;
    Ok(())
}
