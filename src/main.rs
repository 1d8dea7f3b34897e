use colored::Colorize;

fn main() {
    if let Err(e) = recap::run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
