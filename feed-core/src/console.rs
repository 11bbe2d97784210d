use crate::config::Config;
use crate::threat_feed::{self, rules};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
  pub config_path: Option<PathBuf>,
  pub only: Vec<String>,
  pub list_rules: bool,
  pub status: bool,
  pub help: bool,
}

pub enum ConsoleAction {
  RunBatch,
  ExitOk,
}

pub fn parse_args(args: &[String]) -> anyhow::Result<CliOptions> {
  let mut opts = CliOptions::default();
  // args[0] is the binary name.
  let mut it = args.iter().skip(1);
  while let Some(arg) = it.next() {
    match arg.as_str() {
      "--config" => {
        let v = it
          .next()
          .ok_or_else(|| anyhow::anyhow!("`--config` needs a path"))?;
        opts.config_path = Some(PathBuf::from(v));
      }
      "--only" => {
        let v = it
          .next()
          .ok_or_else(|| anyhow::anyhow!("`--only` needs a source_id"))?;
        opts.only.push(v.clone());
      }
      "--list-rules" => opts.list_rules = true,
      "--status" => opts.status = true,
      "--help" | "-h" => opts.help = true,
      other => anyhow::bail!("unknown argument `{other}` (see --help)"),
    }
  }
  Ok(opts)
}

/// Handles the informational flags; anything else means "run the batch".
pub fn run_console_command(cfg: &Config, base: &Path, opts: &CliOptions) -> ConsoleAction {
  if opts.help {
    print_help();
    return ConsoleAction::ExitOk;
  }

  if opts.list_rules {
    for name in rules::BUILTIN_RULE_NAMES {
      println!("{name}");
    }
    return ConsoleAction::ExitOk;
  }

  if opts.status {
    print_status(cfg, base);
    return ConsoleAction::ExitOk;
  }

  ConsoleAction::RunBatch
}

fn print_status(cfg: &Config, base: &Path) {
  let (sources, rejected) = cfg.resolve_feeds();
  println!("Data directory: {}", base.display());
  println!("Publish mode: {:?}", cfg.publish.mode);

  for st in threat_feed::status(base, &sources) {
    let fetched = st
      .last_fetched
      .map(|t| t.to_rfc3339())
      .unwrap_or_else(|| "never".to_string());
    let checksum = if st.has_checksum { "yes" } else { "no" };
    println!("- {}: last changed fetch {fetched}, checksum {checksum}", st.source_id);
  }
  for (id, e) in rejected {
    println!("- {id}: INVALID ({e})");
  }
}

fn print_help() {
  println!("feed-core: fetch threat feeds, normalize IOCs and publish new indicators");
  println!();
  println!("Usage: feed-core [OPTIONS]");
  println!();
  println!("  --config <path>      Use this config file instead of the default location");
  println!("  --only <source_id>   Run only this feed (repeatable)");
  println!("  --list-rules         Print the builtin parsing rule names");
  println!("  --status             Print per-feed state from previous runs");
  println!("  --version            Print the version");
  println!();
  println!("Data directory: $FEED_CORE_HOME, else ~/.local/share/feed-core");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(list: &[&str]) -> Vec<String> {
    std::iter::once("feed-core")
      .chain(list.iter().copied())
      .map(String::from)
      .collect()
  }

  #[test]
  fn flags_are_parsed() {
    let opts = parse_args(&args(&[
      "--config",
      "/etc/feed-core.toml",
      "--only",
      "ipsum_level3",
      "--only",
      "nocoin",
      "--status",
    ]))
    .unwrap();
    assert_eq!(opts.config_path, Some(PathBuf::from("/etc/feed-core.toml")));
    assert_eq!(opts.only, vec!["ipsum_level3".to_string(), "nocoin".to_string()]);
    assert!(opts.status);
    assert!(!opts.list_rules);
  }

  #[test]
  fn missing_values_and_unknown_flags_fail() {
    assert!(parse_args(&args(&["--config"])).is_err());
    assert!(parse_args(&args(&["--only"])).is_err());
    assert!(parse_args(&args(&["--frobnicate"])).is_err());
    assert_eq!(parse_args(&args(&[])).unwrap(), CliOptions::default());
  }
}
