// Startup module - displays banner and module status
//
// Shows version, config source, database location and the monitor's
// components before the controller starts polling.

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Module loading result for display
pub struct ModuleStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: &'static str,
}

/// Print the startup banner and module status
pub fn print_startup(config: &Config, platform: &str) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}livewatch{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Live-stream interaction monitor{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!(
        "  {DIM}Database:{RESET} {}",
        config.storage.db_path.display()
    );
    println!();

    println!("  {DIM}Loading modules...{RESET}");
    for module in &module_status(config) {
        print_module_status(module);
    }
    println!();

    println!("  {MAGENTA}▸{RESET} Platform: {BOLD}{platform}{RESET}");
    if platform == "demo" {
        println!(
            "  {YELLOW}▸{RESET} {YELLOW}Demo mode active{RESET} {DIM}(simulated streams){RESET}"
        );
    }
    println!(
        "  {MAGENTA}▸{RESET} Run {BOLD}livewatch job start{RESET} to begin monitoring"
    );
    println!();
}

/// Status of each monitor component
pub fn module_status(config: &Config) -> Vec<ModuleStatus> {
    vec![
        ModuleStatus {
            name: "store",
            enabled: true,
            description: "SQLite persistence gateway",
        },
        ModuleStatus {
            name: "controller",
            enabled: true,
            description: "Run-signal polling",
        },
        ModuleStatus {
            name: "reconciler",
            enabled: true,
            description: "Identity registry sync",
        },
        ModuleStatus {
            name: "supervisors",
            enabled: true,
            description: "Per-identity connections",
        },
        ModuleStatus {
            name: "file-logs",
            enabled: config.logging.file_enabled,
            description: "JSON log files",
        },
    ]
}

fn print_module_status(module: &ModuleStatus) {
    use colors::*;

    let (icon, style) = if module.enabled {
        (format!("{GREEN}✓{RESET}"), "")
    } else {
        (format!("{DIM}○{RESET}"), DIM)
    };

    println!(
        "    {icon} {style}{:<12}{RESET} {DIM}{}{RESET}",
        module.name, module.description
    );
}

/// Record the effective startup settings in the log
pub fn log_startup(config: &Config, platform: &str) {
    tracing::info!(version = VERSION, platform, "livewatch starting");
    tracing::info!(
        db_path = %config.storage.db_path.display(),
        max_concurrent = config.storage.max_concurrent,
        max_retries = config.storage.max_retries,
        "Storage"
    );
    tracing::info!(
        min_check_secs = config.supervisor.min_check_interval_secs,
        max_retries = config.supervisor.max_retries,
        cooldown_secs = config.supervisor.reconnect_cooldown_secs,
        refresh_secs = config.registry.refresh_interval_secs,
        poll_secs = config.control.poll_interval_secs,
        "Monitor timings"
    );

    for module in module_status(config) {
        let icon = if module.enabled { "✓" } else { "○" };
        tracing::debug!("  {} {} - {}", icon, module.name, module.description);
    }

    tracing::info!("Ready. Waiting for job start...");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_toggles_module() {
        let mut config = Config::default();
        let enabled = |c: &Config| {
            module_status(c)
                .into_iter()
                .find(|m| m.name == "file-logs")
                .map(|m| m.enabled)
        };
        assert_eq!(enabled(&config), Some(false));

        config.logging.file_enabled = true;
        assert_eq!(enabled(&config), Some(true));
    }
}
