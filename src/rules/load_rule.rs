use log::debug;
use serde_yaml as yml;

use crate::error::TrackError;

use super::Rule;

impl Rule {
    pub fn from_file(filename: &str) -> Result<Rule, TrackError> {
        let rule_file = match std::fs::OpenOptions::new().read(true).open(filename) {
            Ok(rule_file) => rule_file,
            Err(err) => {
                return Err(TrackError(err.to_string()));
            }
        };

        let mut rule: Rule = match yml::from_reader(rule_file) {
            Ok(rule) => rule,
            Err(err) => {
                return Err(TrackError(format!("Unable to parse '{}': {}", filename, err)));
            }
        };

        rule.check_up()?;
        Ok(rule)
    }
}

/// Parses and validates one rule from YAML text.
pub fn rule_from_yaml_str(text: &str) -> Result<Rule, TrackError> {
    let mut rule: Rule = yml::from_str(text)?;
    rule.check_up()?;
    Ok(rule)
}

fn recursively_walk_dir(dir_path: &std::path::Path, base_dir: String) -> Vec<String> {
    let mut result = Vec::new();
    let entities = dir_path.read_dir();

    if let Err(err) = entities {
        debug!("Error while trying to walk directory {}: {}", dir_path.to_string_lossy(), err);
        return result;
    }

    for entry in entities.unwrap() {
        match entry {
            Ok(entry) => {
                if entry.path().is_file() {
                    let os_file_name = entry.file_name();
                    let fln = os_file_name.to_string_lossy();

                    if fln.ends_with(".yaml") || fln.ends_with(".yml") {
                        result.push(format!("{}/{}", base_dir, fln));
                    }
                } else if entry.path().is_dir() {
                    let os_file_name = entry.file_name();
                    let fln = os_file_name.to_string_lossy();

                    let mut sub_results = recursively_walk_dir(&entry.path(), format!("{}/{}", base_dir, fln));
                    result.append(&mut sub_results);
                }
            }
            Err(err) => {
                debug!("Error while walking directory {}: {}", dir_path.to_string_lossy(), err);
            }
        }
    }

    result
}

/// Loads every rule found under the given paths. Files are taken as-is,
/// directories are walked recursively for `.yaml`/`.yml` files. Rules that
/// fail validation abort the whole load.
pub fn load_rules(paths: &[String]) -> Result<Vec<Rule>, TrackError> {
    let mut files: Vec<String> = Vec::default();

    for raw_rule_path in paths.iter() {
        let rule_path = std::path::Path::new(raw_rule_path);
        if !rule_path.exists() {
            debug!("File or directory does not exist: {}", raw_rule_path);
            continue;
        }

        if rule_path.is_file() {
            files.push(raw_rule_path.clone());
        } else if rule_path.is_dir() {
            let base = raw_rule_path.trim_end_matches('/').to_string();
            files.append(&mut recursively_walk_dir(rule_path, base));
        }
    }

    let mut rules = Vec::with_capacity(files.len());
    for file in files.iter() {
        let rule = Rule::from_file(file)?;
        debug!("Loaded rule '{}' from {}", rule.get_id(), file);
        rules.push(rule);
    }

    Ok(rules)
}
