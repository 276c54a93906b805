#[macro_use]
extern crate slog;

use jobmesh::api;
use jobmesh::contexts::ConfigManager;
use jobmesh::error_helpers;
use jobmesh::errors::*;
use jobmesh::executor::TaskExecutor;
use jobmesh::model::{insertable, MissionDag};
use jobmesh::network::NetworkConfig;
use jobmesh::peer_client::PeerClientLive;
use jobmesh::settings::Settings;
use jobmesh::store;
use jobmesh::worker::WorkerSpawnerLive;

use clap::{Arg, ArgAction, ArgMatches, Command};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use slog::{Drain, Logger};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

//
// Main
//

fn main() {
    let mut app = Command::new("jobmesh")
        .version("0.1")
        .about("Coordination node for multi-party privacy jobs")
        .arg(
            Arg::new("log-async")
                .long("log-async")
                .action(ArgAction::SetTrue)
                .help("Log asynchronously (good for logging on servers)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Quiets all output"),
        )
        .arg(
            Arg::new("num-connections")
                .short('c')
                .long("num-connections")
                .value_name("NUM")
                .help("Number of database connections"),
        )
        .subcommand(
            Command::new("api").about("Starts the API server").arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .help("Port to bind server to"),
            ),
        )
        .subcommand(Command::new("migrate").about("Migrates the database"))
        .subcommand(
            Command::new("init")
                .about("Migrates the database and loads mission templates"),
        )
        .subcommand(
            Command::new("run-task")
                .about("Executes a single task (internal worker entry point)")
                .hide(true)
                .arg(Arg::new("job-id").long("job-id").required(true))
                .arg(Arg::new("task-name").long("task-name").required(true)),
        )
        .subcommand(
            Command::new("sleep")
                .about("Sleep (useful for attaching to with Docker)")
                .arg(Arg::new("SLEEP_SECONDS").required(true)),
        );

    let matches = app.clone().get_matches();
    let log = log(&matches);

    let res = match matches.subcommand() {
        Some(("api", sub_matches)) => subcommand_api(&log, &matches, sub_matches),
        Some(("migrate", _)) => subcommand_migrate(&log),
        Some(("init", _)) => subcommand_init(&log),
        Some(("run-task", sub_matches)) => subcommand_run_task(&log, sub_matches),
        Some(("sleep", sub_matches)) => subcommand_sleep(&log, sub_matches),
        _ => {
            app.print_help().unwrap();
            Ok(())
        }
    };
    if let Err(ref e) = res {
        error_helpers::print_error(&log, e);
        std::process::exit(1);
    }
}

//
// Subcommands
//

fn subcommand_api(log: &Logger, matches: &ArgMatches, sub_matches: &ArgMatches) -> Result<()> {
    let settings = Settings::from_env()?;
    if settings.secret.is_none() {
        return Err(error::validation("env SECRET is required to serve the API"));
    }
    let port = sub_matches
        .get_one::<String>("port")
        .cloned()
        .unwrap_or_else(|| "5000".to_owned());
    let network_config = NetworkConfig::load(log, &settings)?;
    let pool = store::pool(&settings.db_uri, num_connections(matches))?;

    api::Server {
        log: log.clone(),
        pool,
        settings,
        network_config,
        port,
    }
    .run()
}

fn subcommand_migrate(log: &Logger) -> Result<()> {
    let settings = Settings::from_env()?;
    let mut conn = connect(&settings)?;
    store::run_migrations(&mut conn)?;
    info!(log, "Migrations up to date"; "db_uri" => settings.db_uri.as_str());
    Ok(())
}

/// Migrations plus first-boot seeding: the node's own party name into the
/// global config and every mission template in the mission directory into
/// the mission table. Re-running is harmless; existing rows are kept.
fn subcommand_init(log: &Logger) -> Result<()> {
    let settings = Settings::from_env()?;
    let mut conn = connect(&settings)?;
    store::run_migrations(&mut conn)?;

    store::global_config_insert_if_absent(
        &mut conn,
        &insertable::GlobalConfig {
            config_key:   "party".to_owned(),
            config_value: settings.party.clone(),
        },
    )?;

    let num_missions = load_mission_templates(log, &mut conn, &settings.mission_dir)?;
    info!(log, "Initialized database";
        "party" => settings.party.as_str(), "num_missions" => num_missions);
    Ok(())
}

fn subcommand_run_task(log: &Logger, sub_matches: &ArgMatches) -> Result<()> {
    let settings = Settings::from_env()?;
    let job_id = sub_matches.get_one::<String>("job-id").unwrap().clone();
    let task_name = sub_matches.get_one::<String>("task-name").unwrap().clone();
    let log = log.new(o!("job_id" => job_id.clone(), "task_name" => task_name.clone()));

    let network_config = NetworkConfig::load(&log, &settings)?;
    let peer_client = PeerClientLive::new(&network_config, settings.jwt_token.clone())?;
    let spawner = WorkerSpawnerLive {};
    let mut conn = connect(&settings)?;
    let job = store::job_require(&mut conn, &job_id)?;
    let config_manager = ConfigManager::connect(&settings, &job.mission_name, &job_id)?;

    let res = TaskExecutor {
        conn: &mut conn,
        settings: &settings,
        network_config: &network_config,
        peer_client: &peer_client,
        spawner: &spawner,
        config_manager,
        job_id,
        task_name,
    }
    .run(&log)?;
    info!(log, "Worker finished"; "claimed" => res.claimed, "succeeded" => res.succeeded);
    Ok(())
}

fn subcommand_sleep(log: &Logger, sub_matches: &ArgMatches) -> Result<()> {
    let seconds: u64 = sub_matches
        .get_one::<String>("SLEEP_SECONDS")
        .unwrap()
        .parse()
        .map_err(|_| error::validation("SLEEP_SECONDS must be an integer"))?;
    info!(log, "Sleeping"; "seconds" => seconds);
    thread::sleep(Duration::from_secs(seconds));
    Ok(())
}

//
// Private functions
//

fn connect(settings: &Settings) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(&settings.db_uri)
        .chain_err(|| format!("Error connecting to database at {}", settings.db_uri))?;
    store::configure_connection(&mut conn)?;
    Ok(conn)
}

fn load_mission_templates(
    log: &Logger,
    conn: &mut SqliteConnection,
    mission_dir: &str,
) -> Result<usize> {
    let dir = Path::new(mission_dir);
    if !dir.is_dir() {
        warn!(log, "Mission directory not found -- skipping template load";
            "mission_dir" => mission_dir);
        return Ok(0);
    }

    let mut num_missions = 0;
    let mut entries: Vec<_> = fs::read_dir(dir)
        .chain_err(|| format!("Error reading mission directory {}", mission_dir))?
        .collect::<std::result::Result<_, _>>()
        .chain_err(|| format!("Error reading mission directory {}", mission_dir))?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yml") {
            continue;
        }
        let raw = fs::read_to_string(&path)
            .chain_err(|| format!("Error reading mission template {}", path.display()))?;
        let document: MissionDag = serde_yaml::from_str(&raw)
            .chain_err(|| format!("Error parsing mission template {}", path.display()))?;

        let name = document.meta.name.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let version = document.meta.version.unwrap_or(1);
        store::mission_insert_if_absent(
            conn,
            &insertable::Mission {
                name: name.clone(),
                version,
                dag: serde_json::to_string(&document)
                    .chain_err(|| "Error serializing mission template")?,
            },
        )?;
        info!(log, "Loaded mission template";
            "mission" => format!("{}@v{}", name, version), "file" => path.display().to_string());
        num_missions += 1;
    }
    Ok(num_missions)
}

fn num_connections(matches: &ArgMatches) -> u32 {
    matches
        .get_one::<String>("num-connections")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(10)
}

fn log(matches: &ArgMatches) -> Logger {
    if matches.get_flag("quiet") {
        return Logger::root(slog::Discard, o!());
    }
    let decorator = slog_term::TermDecorator::new().build();
    if matches.get_flag("log-async") {
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, o!("env" => "live"))
    } else {
        let drain = slog_term::FullFormat::new(decorator).build();
        let drain = std::sync::Mutex::new(drain).fuse();
        Logger::root(drain, o!("env" => "live"))
    }
}
