use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  let ok = feed_core::run_console(&args).context("run feed batch")?;
  if !ok {
    eprintln!("feed-core: no feed succeeded; see the log for details");
    std::process::exit(1);
  }
  Ok(())
}
