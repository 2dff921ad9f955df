use console::style;

pub fn execute() {
    println!(
        "{} {}",
        style("sauti").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
}
