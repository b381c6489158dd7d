//! Process-level commands: run, list, status, stop, restart, logs, clean and
//! the bulk verbs. All user-facing formatting lives here; the core only
//! returns records and structured errors.

pub mod group;
pub mod port;

use crate::daemon;

use sentinel::{
    error::{BatchReport, Result},
    helpers::{self, ColoredString},
    logs::{self, FollowCursor, Stream},
    monitor, process,
    process::{SpawnRequest, StopOutcome},
    registry::{ProcessRecord, Registry, Selector},
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use macros_rs::{string, ternary};
use serde_json::json;
use tabled::{
    settings::{object::Rows, themes::Colorization, Color, Style},
    Table, Tabled,
};

const FOLLOW_POLL: Duration = Duration::from_millis(500);

pub fn run(
    registry: &Registry,
    command: &[String],
    name: &Option<String>,
    restart: bool,
    group: &Option<String>,
    env_file: &Option<PathBuf>,
) -> Result<()> {
    let record = process::spawn(
        registry,
        SpawnRequest {
            command: command.join(" "),
            name: name.clone(),
            restart,
            group: group.clone(),
            env_file: env_file.clone(),
            ..Default::default()
        },
    )?;

    match &record.group {
        Some(group) => println!(
            "{} Started {} (id: {}, pid: {}) in group {}",
            *helpers::SUCCESS,
            record.name.bold(),
            record.id,
            record.pid,
            group.bold()
        ),
        None => println!(
            "{} Started {} (id: {}, pid: {})",
            *helpers::SUCCESS,
            record.name.bold(),
            record.id,
            record.pid
        ),
    }

    if restart && daemon::status(registry.state_dir()).is_none() {
        println!(
            "{} Restart flag set but the daemon is not running; restarts only happen when other sentinel commands run",
            *helpers::WARN
        );
        println!("  Run `sentinel daemon start` for continuous monitoring");
    }

    Ok(())
}

pub fn list(registry: &Registry, format: &String) -> Result<()> {
    report_sweep(&monitor::sweep(registry)?);

    let catalog = registry.snapshot()?;
    if catalog.processes.is_empty() {
        println!("{} Process table empty", *helpers::SUCCESS);
        return Ok(());
    }

    #[derive(Tabled, Debug)]
    struct ProcessItem {
        id: ColoredString,
        name: String,
        pid: String,
        status: ColoredString,
        cpu: String,
        mem: String,
        uptime: String,
        restart: String,
        group: String,
        command: String,
    }

    impl serde::Serialize for ProcessItem {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            let trimmed_json = json!({
                "id": &self.id.0.trim(),
                "name": &self.name.trim(),
                "pid": &self.pid.trim(),
                "status": &self.status.0.trim(),
                "cpu": &self.cpu.trim(),
                "mem": &self.mem.trim(),
                "uptime": &self.uptime.trim(),
                "restart": &self.restart.trim(),
                "group": &self.group.trim(),
                "command": &self.command.trim(),
            });
            trimmed_json.serialize(serializer)
        }
    }

    let alive: HashMap<u64, bool> = catalog
        .processes
        .iter()
        .map(|record| (record.id, process::record_alive(record)))
        .collect();
    let live_pids: Vec<i64> = catalog
        .processes
        .iter()
        .filter(|record| alive[&record.id])
        .map(|record| record.pid)
        .collect();
    let metrics = process::unix::sample_metrics_many(&live_pids);

    let items: Vec<ProcessItem> = catalog
        .processes
        .iter()
        .map(|record| {
            let running = alive[&record.id];
            let sample = metrics.get(&record.pid).copied().unwrap_or_default();

            ProcessItem {
                id: ColoredString(record.id.to_string().cyan()),
                name: record.name.clone(),
                pid: record.pid.to_string(),
                status: ColoredString(ternary!(
                    running,
                    "online".green().bold(),
                    "stopped".red().bold()
                )),
                cpu: ternary!(running, format!("{:.1}%", sample.cpu_percent), string!("0.0%")),
                mem: ternary!(running, helpers::format_memory(sample.memory), string!("0b")),
                uptime: ternary!(running, helpers::format_duration(record.started_at), string!("-")),
                restart: ternary!(record.restart, string!("yes"), string!("-")),
                group: record.group.clone().unwrap_or_else(|| string!("-")),
                command: truncate(&record.command, 40),
            }
        })
        .collect();

    render_table(&items, format);
    Ok(())
}

pub fn status(registry: &Registry, selector: &Selector) -> Result<()> {
    report_sweep(&monitor::sweep_target(registry, selector)?);

    let record = registry.find_process(selector)?;
    let status = process::probe(&record);

    println!("\n{} (id: {})", record.name.bold(), record.id);
    println!("  PID:       {}", record.pid);
    println!(
        "  Status:    {}",
        ternary!(status.alive, "online".green().bold(), "stopped".red().bold())
    );
    println!("  CPU:       {:.1}%", status.cpu_percent);
    println!("  Memory:    {}", helpers::format_memory(status.memory));
    println!(
        "  Uptime:    {}",
        ternary!(
            status.alive,
            helpers::format_duration(record.started_at),
            string!("-")
        )
    );
    println!("  Restart:   {}", ternary!(record.restart, "yes", "no"));
    println!(
        "  Group:     {}",
        record.group.as_deref().unwrap_or("none")
    );
    println!("  CWD:       {}", record.cwd.display());
    println!("  Command:   {}", record.command);
    println!("  Stdout:    {}", record.stdout_path.display());
    println!("  Stderr:    {}", record.stderr_path.display());
    Ok(())
}

pub fn stop(registry: &Registry, selector: &Selector, force: bool) -> Result<()> {
    let (record, outcome) = process::stop(registry, selector, force)?;
    match outcome {
        StopOutcome::Stopped => println!(
            "{} Stopped {} (id: {})",
            *helpers::SUCCESS,
            record.name.bold(),
            record.id
        ),
        StopOutcome::AlreadyDead => println!(
            "{} Process {} was already dead (id: {})",
            *helpers::WARN,
            record.name.bold(),
            record.id
        ),
    }
    Ok(())
}

pub fn restart(registry: &Registry, selector: &Selector) -> Result<()> {
    let record = process::restart(registry, selector)?;
    println!(
        "{} Restarted {} (id: {}, pid: {})",
        *helpers::SUCCESS,
        record.name.bold(),
        record.id,
        record.pid
    );
    Ok(())
}

pub fn logs(
    registry: &Registry,
    selector: &Selector,
    lines: usize,
    follow: bool,
    stream: Stream,
    clear: bool,
) -> Result<()> {
    let record = registry.find_process(selector)?;

    if clear {
        logs::clear(&record.stdout_path, &record.stderr_path)?;
        println!("{} Cleared logs for {}", *helpers::SUCCESS, record.name.bold());
        return Ok(());
    }

    if stream.wants_stdout() {
        println!("{}", format!("=== stdout ({}) ===", record.stdout_path.display()).cyan().bold());
        for line in logs::tail(&record.stdout_path, lines) {
            println!("{line}");
        }
    }
    if stream.wants_stderr() {
        println!("\n{}", format!("=== stderr ({}) ===", record.stderr_path.display()).red().bold());
        for line in logs::tail(&record.stderr_path, lines) {
            println!("{}", line.red());
        }
    }

    if follow {
        println!("\n{}", "Following logs (Ctrl+C to stop)...".dimmed());
        follow_logs(&record, stream);
    }
    Ok(())
}

fn follow_logs(record: &ProcessRecord, stream: Stream) -> ! {
    let mut stdout_cursor = FollowCursor::new(&record.stdout_path);
    let mut stderr_cursor = FollowCursor::new(&record.stderr_path);

    // Runs until the user interrupts; SIGINT terminates the whole command.
    loop {
        if stream.wants_stdout() {
            for line in stdout_cursor.poll() {
                println!("{} {line}", "out:".cyan());
            }
        }
        if stream.wants_stderr() {
            for line in stderr_cursor.poll() {
                println!("{} {line}", "err:".red());
            }
        }
        std::thread::sleep(FOLLOW_POLL);
    }
}

pub fn clean(registry: &Registry) -> Result<()> {
    let removed = process::clean(registry)?;
    if removed.is_empty() {
        println!("{} No dead processes found", *helpers::SUCCESS);
    } else {
        for record in removed {
            println!(
                "{} Removed dead process {} (id: {})",
                *helpers::SUCCESS,
                record.name.bold(),
                record.id
            );
        }
    }
    Ok(())
}

pub fn stopall(registry: &Registry, force: bool) -> Result<()> {
    let catalog = registry.snapshot()?;
    let mut report = BatchReport::default();

    for (index, record) in catalog.processes.iter().enumerate() {
        match process::stop_pid(record.pid, force) {
            Ok(_) => report.push_ok(&record.name),
            Err(err) => report.push_err(index, &record.name, err),
        }
    }
    print_batch(&report, "Stopped");
    Ok(())
}

pub fn startall(registry: &Registry) -> Result<()> {
    let catalog = registry.snapshot()?;
    if catalog.processes.is_empty() {
        println!("{} No processes to start", *helpers::SUCCESS);
        return Ok(());
    }

    let mut report = BatchReport::default();
    for (index, record) in catalog.processes.iter().enumerate() {
        if process::record_alive(record) {
            continue;
        }
        match process::respawn(registry, record.id) {
            Ok(_) => report.push_ok(&record.name),
            Err(err) => report.push_err(index, &record.name, err),
        }
    }
    print_batch(&report, "Started");
    Ok(())
}

pub fn restartall(registry: &Registry) -> Result<()> {
    let catalog = registry.snapshot()?;
    if catalog.processes.is_empty() {
        println!("{} No processes to restart", *helpers::SUCCESS);
        return Ok(());
    }

    let mut report = BatchReport::default();
    for (index, record) in catalog.processes.iter().enumerate() {
        let outcome = process::stop_pid(record.pid, false)
            .and_then(|_| process::respawn(registry, record.id));
        match outcome {
            Ok(_) => report.push_ok(&record.name),
            Err(err) => report.push_err(index, &record.name, err),
        }
    }
    print_batch(&report, "Restarted");
    Ok(())
}

pub fn daemon_start(registry: &Registry, interval: u64) -> Result<()> {
    let interval = Duration::from_secs(interval.max(1));
    let pid = daemon::start(registry.state_dir(), interval)?;
    println!("{} Started daemon (pid: {pid})", *helpers::SUCCESS);
    Ok(())
}

pub fn daemon_stop(registry: &Registry) -> Result<()> {
    match daemon::stop(registry.state_dir())? {
        Some(pid) => println!("{} Stopped daemon (pid: {pid})", *helpers::SUCCESS),
        None => println!("{} Daemon is not running", *helpers::WARN),
    }
    Ok(())
}

pub fn daemon_status(registry: &Registry) -> Result<()> {
    match daemon::status(registry.state_dir()) {
        Some(pid) => println!("{} Daemon is running (pid: {pid})", *helpers::SUCCESS),
        None => println!("{} Daemon is not running", *helpers::WARN),
    }
    Ok(())
}

pub(crate) fn report_sweep(outcome: &monitor::SweepOutcome) {
    for (old_pid, record) in &outcome.restarted {
        println!(
            "{} Auto-restarted {} (old_pid: {old_pid}, new_pid: {})",
            *helpers::WARN,
            record.name.bold(),
            record.pid
        );
    }
    for (name, err) in &outcome.failed {
        println!("{} Failed to restart {name}: {err}", *helpers::FAIL);
    }
    if !outcome.is_quiet() {
        println!();
    }
}

pub(crate) fn print_batch(report: &BatchReport, verb: &str) {
    for name in &report.succeeded {
        println!("{} {verb} {}", *helpers::SUCCESS, name.bold());
    }
    for failure in &report.failed {
        println!(
            "{} Failed on {}: {}",
            *helpers::FAIL,
            failure.target,
            failure.error
        );
    }
    if !report.succeeded.is_empty() || !report.failed.is_empty() {
        println!(
            "\n{} {verb} {} process(es), {} failed",
            *helpers::SUCCESS,
            report.succeeded.len(),
            report.failed.len()
        );
    }
}

pub(crate) fn render_table<T: Tabled + serde::Serialize + std::fmt::Debug>(items: &[T], format: &String) {
    match format.as_str() {
        "raw" => println!("{items:?}"),
        "json" => {
            if let Ok(json) = serde_json::to_string(items) {
                println!("{json}");
            }
        }
        _ => {
            let table = Table::new(items)
                .with(Style::rounded().remove_verticals())
                .with(Colorization::exact([Color::FG_BRIGHT_CYAN], Rows::first()))
                .to_string();
            println!("{table}");
        }
    }
}

fn truncate(command: &str, max: usize) -> String {
    if command.chars().count() > max {
        let cut: String = command.chars().take(max).collect();
        format!("{cut}...")
    } else {
        command.to_string()
    }
}
