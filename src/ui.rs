use crate::config::ProvisionRecord;
use console::style;
use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner with a message.
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .expect("valid template"),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Prompt for the bootstrap connect target.
pub fn prompt_target() -> Result<String, anyhow::Error> {
    let target: String = Input::new()
        .with_prompt("Remote target (user@host[:port])")
        .interact_text()?;
    Ok(target)
}

/// Prompt for the one-time bootstrap password.
pub fn prompt_password(user: &str, host: &str) -> Result<String, anyhow::Error> {
    let password = Password::new()
        .with_prompt(format!("Password for {user}@{host}"))
        .interact()?;
    Ok(password)
}

/// Print the setup summary.
pub fn print_summary(record: &ProvisionRecord) {
    let divider = "=".repeat(60);

    println!("\n{divider}");
    println!("  ARC Link Setup Complete");
    println!("{divider}");
    println!("  Remote:            {}", record.host);
    println!("  Login:             ssh {}", record.ready_as);
    println!("  Tunnel endpoint:   {}", record.endpoint);
    println!("  Tunnel aliases:    remotehost (10.0.0.1), pub.remotehost");
    println!();
    println!("  Tunnel configs:    /etc/wireguard/wg0.conf (both machines)");
    println!("                     user copies under ~/.arc/wireguard/");
    println!("  Shared home:       /home/arc over NFSv4 (automount)");
    println!("  Setup record:      ~/.arc/provision/{}.json", record.id);
    println!("{divider}");
    println!("  Next steps:");
    println!("    1. ssh {}", record.ready_as);
    println!("    2. ping remotehost");
    println!("    3. ls /home/arc");
    println!("{divider}\n");
}

/// Print a failed step with its error text.
pub fn print_step_failure(index: usize, total: usize, label: &str, err: &str) {
    eprintln!(
        "\n{} [Step {}/{}] {}",
        style("FAILED").red().bold(),
        index + 1,
        total,
        label
    );
    eprintln!("{}", style(err).red());
    eprintln!(
        "\n{}",
        style("Fix the cause and re-run `arclink setup`; completed steps are idempotent.").dim()
    );
}
