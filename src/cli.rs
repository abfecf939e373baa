//! Command line interface.
//!
//! [`Cli`] carries the subcommands in [`Command`] (list, run, replay) and the
//! global flags (--config, --verbose).

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::data::{DataObjectHandle, DataStore};
use crate::error::EngineError;

/// Run jobs over named data objects with locking, progress and provenance.
#[derive(Debug, Parser)]
#[command(name = "jobflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file; defaults to ./jobflow.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lists the registered jobs.
    List,

    /// Runs one job.
    Run {
        job: String,

        /// Job version; the latest registered one if omitted.
        #[arg(long = "job-version")]
        job_version: Option<u32>,

        /// Sets a property from its literal form.
        #[arg(long = "set", value_name = "NAME=LITERAL", value_parser = parse_assignment)]
        set: Vec<(String, String)>,

        #[command(flatten)]
        data: DataArgs,

        /// Print the provenance record after a successful run.
        #[arg(long, default_value_t = false)]
        history: bool,

        /// Skip failing collection members instead of failing the job.
        #[arg(long, default_value_t = false)]
        continue_on_member_failure: bool,
    },

    /// Re-runs the job recorded in a history file.
    Replay {
        file: PathBuf,

        /// Node of the record to replay; 0 is the top-level job.
        #[arg(long, default_value_t = 0)]
        node: usize,

        #[command(flatten)]
        data: DataArgs,
    },
}

/// Data objects to put in the store before the job runs.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct DataArgs {
    /// Stores the JSON in FILE as a data object called NAME.
    #[arg(long = "load", value_name = "NAME=FILE", value_parser = parse_assignment)]
    pub load: Vec<(String, String)>,

    /// Stores a collection called NAME with one member per element of the
    /// JSON array in FILE.
    #[arg(long = "collection", value_name = "NAME=FILE", value_parser = parse_assignment)]
    pub collection: Vec<(String, String)>,
}

impl DataArgs {
    pub fn load_into(&self, store: &dyn DataStore) -> Result<(), EngineError> {
        for (name, path) in &self.load {
            let payload = read_json(Path::new(path))?;
            store.store(name, DataObjectHandle::new(name.clone(), payload));
        }
        for (name, path) in &self.collection {
            let serde_json::Value::Array(items) = read_json(Path::new(path))? else {
                return Err(EngineError::Config(format!(
                    "{path}: a collection file must hold a JSON array"
                )));
            };
            let members = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| DataObjectHandle::new(format!("{name}_{}", i + 1), item))
                .collect();
            store.store(name, DataObjectHandle::collection(name.clone(), members));
        }
        Ok(())
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value, EngineError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Splits `NAME=VALUE` at the first `=`.
pub fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if name.trim().is_empty() {
        return Err(format!("missing name in '{s}'"));
    }
    Ok((name.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataStore;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from([
            "jobflow",
            "run",
            "Scale",
            "--set",
            "Factor=2.5",
            "--set",
            "OutputData=out",
            "--load",
            "InputData=in.json",
            "--history",
        ]);
        match cli.command {
            Command::Run {
                job,
                job_version,
                set,
                data,
                history,
                continue_on_member_failure,
            } => {
                assert_eq!(job, "Scale");
                assert_eq!(job_version, None);
                assert_eq!(
                    set,
                    vec![
                        ("Factor".to_string(), "2.5".to_string()),
                        ("OutputData".to_string(), "out".to_string()),
                    ]
                );
                assert_eq!(data.load, vec![("InputData".to_string(), "in.json".to_string())]);
                assert!(history);
                assert!(!continue_on_member_failure);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["jobflow", "--config", "custom.toml", "--verbose", "list"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn cli_parses_replay_subcommand() {
        let cli = Cli::parse_from(["jobflow", "replay", "history.json", "--node", "2"]);
        match cli.command {
            Command::Replay { file, node, .. } => {
                assert_eq!(file, PathBuf::from("history.json"));
                assert_eq!(node, 2);
            }
            _ => panic!("expected Replay command"),
        }
    }

    #[test]
    fn assignments_keep_later_equals_signs() {
        assert_eq!(
            parse_assignment("Expr=a=b"),
            Ok(("Expr".to_string(), "a=b".to_string()))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn data_args_load_objects_and_collections() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.json");
        let many = dir.path().join("many.json");
        std::fs::write(&single, "[1, 2]").unwrap();
        std::fs::write(&many, "[[1], [2], [3]]").unwrap();

        let args = DataArgs {
            load: vec![("a".into(), single.display().to_string())],
            collection: vec![("b".into(), many.display().to_string())],
        };
        let store = InMemoryDataStore::new();
        args.load_into(&store).unwrap();

        assert_eq!(store.retrieve("a").unwrap().payload(), Some(serde_json::json!([1, 2])));
        let b = store.retrieve("b").unwrap();
        assert_eq!(b.member_count(), Some(3));
        assert_eq!(b.member(2).unwrap().name(), "b_3");
    }

    #[test]
    fn collection_file_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.json");
        std::fs::write(&path, r#"{"a": 1}"#).unwrap();
        let args = DataArgs {
            load: Vec::new(),
            collection: vec![("c".into(), path.display().to_string())],
        };
        assert!(matches!(
            args.load_into(&InMemoryDataStore::new()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
