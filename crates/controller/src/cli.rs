//! Resource option parsing for the command-line surface
//!
//! Recognizes the `--namespace`, `--cluster`, `--shard`, `--replica`,
//! `--nodes` and `--type` options. Unknown `--` tokens fail; bare tokens
//! are ignored. With `allow_empty_value` a trailing option without a
//! value yields the options collected so far.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("missing {0} value")]
    MissingValue(&'static str),
    #[error("{0} should NOT start with '-'")]
    ValueStartsWithDash(&'static str),
    #[error("parse {0}: invalid number")]
    InvalidNumber(&'static str),
    #[error("shard should be >= 0")]
    NegativeShard,
    #[error("replica should be > 0")]
    NonPositiveReplica,
    #[error("--type must be 'pending' or 'history'")]
    InvalidType,
    #[error("unknown option '{0}'")]
    UnknownOption(String),
}

/// Parsed resource options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOptions {
    pub namespace: String,
    pub cluster: String,
    pub shard: i64,
    pub replica: i64,
    pub nodes: Vec<String>,
    pub task_type: String,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            cluster: String::new(),
            shard: -1,
            replica: 0,
            nodes: Vec::new(),
            task_type: String::new(),
        }
    }
}

/// Parse a token list into resource options
pub fn parse_options(args: &[&str], allow_empty_value: bool) -> Result<ResourceOptions, OptionsError> {
    let mut options = ResourceOptions::default();
    let mut i = 0;
    while i < args.len() {
        let last_arg = i == args.len() - 1;
        match args[i].to_lowercase().as_str() {
            "--namespace" => {
                if last_arg {
                    if allow_empty_value {
                        return Ok(options);
                    }
                    return Err(OptionsError::MissingValue("namespace"));
                }
                i += 1;
                if args[i].starts_with('-') {
                    return Err(OptionsError::ValueStartsWithDash("namespace"));
                }
                options.namespace = args[i].to_string();
            }
            "--cluster" => {
                if last_arg {
                    if allow_empty_value {
                        return Ok(options);
                    }
                    return Err(OptionsError::MissingValue("cluster"));
                }
                i += 1;
                if args[i].starts_with('-') {
                    return Err(OptionsError::ValueStartsWithDash("cluster"));
                }
                options.cluster = args[i].to_string();
            }
            "--shard" => {
                if last_arg {
                    if allow_empty_value {
                        return Ok(options);
                    }
                    return Err(OptionsError::MissingValue("shard"));
                }
                i += 1;
                let shard: i64 = args[i]
                    .parse()
                    .map_err(|_| OptionsError::InvalidNumber("shard"))?;
                if shard < 0 {
                    return Err(OptionsError::NegativeShard);
                }
                options.shard = shard;
            }
            "--replica" => {
                if last_arg {
                    if allow_empty_value {
                        return Ok(options);
                    }
                    return Err(OptionsError::MissingValue("replica"));
                }
                i += 1;
                let replica: i64 = args[i]
                    .parse()
                    .map_err(|_| OptionsError::InvalidNumber("replica"))?;
                if replica <= 0 {
                    return Err(OptionsError::NonPositiveReplica);
                }
                options.replica = replica;
            }
            "--nodes" => {
                if last_arg {
                    if allow_empty_value {
                        return Ok(options);
                    }
                    return Err(OptionsError::MissingValue("nodes"));
                }
                i += 1;
                if args[i].starts_with('-') {
                    return Err(OptionsError::ValueStartsWithDash("nodes"));
                }
                options.nodes = args[i]
                    .trim()
                    .split(',')
                    .filter(|node| !node.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "--type" => {
                if last_arg {
                    if allow_empty_value {
                        return Ok(options);
                    }
                    return Err(OptionsError::MissingValue("type"));
                }
                i += 1;
                let task_type = args[i].to_lowercase();
                if task_type != "pending" && task_type != "history" {
                    return Err(OptionsError::InvalidType);
                }
                options.task_type = task_type;
            }
            other => {
                if other.starts_with("--") {
                    return Err(OptionsError::UnknownOption(args[i].to_string()));
                }
                // bare tokens are the command words, skip them
            }
        }
        i += 1;
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_options() {
        let options = parse_options(
            &[
                "create",
                "cluster",
                "--namespace",
                "ns",
                "--cluster",
                "c1",
                "--shard",
                "2",
                "--replica",
                "3",
                "--nodes",
                "127.0.0.1:6379,,127.0.0.1:6380",
                "--type",
                "pending",
            ],
            false,
        )
        .unwrap();
        assert_eq!(options.namespace, "ns");
        assert_eq!(options.cluster, "c1");
        assert_eq!(options.shard, 2);
        assert_eq!(options.replica, 3);
        // empty entries are dropped silently
        assert_eq!(options.nodes, vec!["127.0.0.1:6379", "127.0.0.1:6380"]);
        assert_eq!(options.task_type, "pending");
    }

    #[test]
    fn test_replica_zero_fails() {
        let err = parse_options(&["--replica", "0"], false).unwrap_err();
        assert_eq!(err, OptionsError::NonPositiveReplica);
    }

    #[test]
    fn test_negative_shard_fails() {
        let err = parse_options(&["--shard", "-1"], false).unwrap_err();
        assert_eq!(err, OptionsError::NegativeShard);
    }

    #[test]
    fn test_unknown_option_fails() {
        let err = parse_options(&["--bogus", "x"], false).unwrap_err();
        assert_eq!(err, OptionsError::UnknownOption("--bogus".to_string()));
        assert_eq!(err.to_string(), "unknown option '--bogus'");
    }

    #[test]
    fn test_namespace_value_with_dash_fails() {
        let err = parse_options(&["--namespace", "-ns"], false).unwrap_err();
        assert_eq!(err, OptionsError::ValueStartsWithDash("namespace"));
    }

    #[test]
    fn test_trailing_option_allow_empty() {
        let options = parse_options(&["--namespace", "ns", "--cluster"], true).unwrap();
        assert_eq!(options.namespace, "ns");
        assert_eq!(options.cluster, "");

        let err = parse_options(&["--namespace", "ns", "--cluster"], false).unwrap_err();
        assert_eq!(err, OptionsError::MissingValue("cluster"));
    }

    #[test]
    fn test_bare_tokens_ignored() {
        let options = parse_options(&["list", "namespaces"], false).unwrap();
        assert_eq!(options, ResourceOptions::default());
    }

    #[test]
    fn test_invalid_type_fails() {
        let err = parse_options(&["--type", "done"], false).unwrap_err();
        assert_eq!(err, OptionsError::InvalidType);
    }
}
