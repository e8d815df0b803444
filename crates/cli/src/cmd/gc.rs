use std::time::Instant;

use anyhow::{Context, Result};

use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::gc::collect_garbage;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(config: &BuilderConfig, dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let _lock = BuildLock::acquire(&config.data_dir(), LockMode::Exclusive, "gc").context("Failed to acquire build lock")?;

  let result = collect_garbage(config, dry_run)?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Roots", &result.stats.roots.to_string());
    print_stat("Live objects", &result.stats.live.to_string());
    print_stat("Objects removed", &result.stats.objects_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
