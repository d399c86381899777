use console::style;

pub struct Console;

impl Console {
    const fn get_width() -> usize {
        40
    }

    pub fn section(title: &str) {
        println!();
        let width = Self::get_width();
        let border = "═".repeat(width);
        println!("{}", style(format!("╔{border}╗")).cyan().bold());
        println!("{}", style(format!("{title:^width$}")).cyan().bold());
        println!("{}", style(format!("╚{border}╝")).cyan().bold());
    }

    pub fn info(label: &str, value: &str) {
        println!("{}: {}", style(label).dim().cyan(), style(value).white());
    }

    pub fn success(text: &str) {
        println!("{} {}", style("✓").green().bold(), style(text).green());
    }

    pub fn warning(text: &str) {
        println!("{} {}", style("⚠").yellow().bold(), style(text).yellow());
    }

    pub fn user_error(text: &str) {
        eprintln!("{} {}", style("✗").red().bold(), style(text).red());
    }
}
