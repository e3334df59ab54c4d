use std::cell::RefCell;
use std::process::exit;
use std::rc::Rc;

use colored::Colorize;
use shellexpand::tilde;

use tracklet::replay::{replay_file, PrintingSink};
use tracklet::{load_rules, Engine, EngineConfig, MemoryStorage};

#[derive(Debug)]
struct TrackletCliError {
    error: String,
}

impl<T> From<T> for TrackletCliError
where
    T: ToString,
{
    fn from(e: T) -> Self {
        Self { error: e.to_string() }
    }
}

fn cli() -> clap::Command {
    clap::Command::new("tracklet")
        .about("Tracklet Command Line Interface")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            clap::Command::new("replay")
                .about("Replay a recorded session log through the engine and print finished events")
                .alias("r")
                .arg_required_else_help(true)
                .arg(
                    clap::arg!(<LOG> "Path to a session log in JSONL format")
                        .required(true)
                )
                .arg(
                    clap::arg!(-r --rules <RULES> "Path to a rule file or a directory of rule files (may repeat)")
                        .action(clap::ArgAction::Append)
                        .required(true)
                )
        )
        .subcommand(
            clap::Command::new("check")
                .about("Validate rule files and list their identifiers")
                .alias("c")
                .arg_required_else_help(true)
                .arg(
                    clap::arg!(<RULES> "Path to a rule file or a directory of rule files")
                        .required(true)
                )
        )
        .arg(
            clap::arg!(-c <CONFIG> "Path to tracklet config")
                .default_value("~/.tracklet/config.yaml")
        )
        .arg(
            clap::arg!(--"debug-file" <FILE> "Write debug log to the given file")
        )
}

fn main() -> Result<(), TrackletCliError> {
    let command = cli().get_matches();

    if let Some(debug_file) = command.get_one::<String>("debug-file") {
        simple_logging::log_to_file(tilde(debug_file).as_ref(), log::LevelFilter::Debug)?;
    }

    let config_path = tilde(command.get_one::<String>("CONFIG").unwrap());
    let config = if std::path::Path::new(config_path.as_ref()).exists() {
        EngineConfig::from_file(config_path.as_ref())?
    }
    else {
        EngineConfig::default()
    };

    match command.subcommand() {
        Some(("replay", args)) => {
            let log_path = args.get_one::<String>("LOG").unwrap();
            let rule_paths: Vec<String> = args
                .get_many::<String>("rules")
                .unwrap()
                .map(|p| tilde(p).to_string())
                .collect();

            let rules = load_rules(&rule_paths)?;
            if rules.is_empty() {
                eprintln!("No rules found under {:?}", &rule_paths);
                exit(1);
            }

            let sink = Rc::new(RefCell::new(PrintingSink::default()));
            let mut engine = Engine::new(
                config,
                rules,
                Box::new(MemoryStorage::new()),
                Box::new(MemoryStorage::new()),
                sink.clone(),
            )?;

            let stats = replay_file(&mut engine, tilde(log_path).as_ref())?;
            println!(
                "{} {} interactions, {} network calls, {} navigations, {} events delivered",
                "done".cyan().bold(),
                stats.interactions,
                stats.network_calls,
                stats.navigations,
                sink.borrow().delivered
            );
            if stats.skipped_lines > 0 {
                eprintln!("{} skipped {} unreadable lines", "warn".yellow(), stats.skipped_lines);
            }
        }
        Some(("check", args)) => {
            let rules_path = tilde(args.get_one::<String>("RULES").unwrap()).to_string();
            let rules = load_rules(&[rules_path])?;

            for rule in rules.iter() {
                println!(
                    "{} {} ({}) - {} mapping(s)",
                    "ok".green().bold(),
                    rule.get_id(),
                    &rule.event_type,
                    rule.mappings.len()
                );
            }
            println!("{} rule(s) are fine", rules.len());
        }
        _ => {
            unreachable!()
        }
    }

    Ok(())
}
