use clap::Parser;

fn main() {
    dotenvy::dotenv().ok();
    feedreelctl::init_tracing();
    let cli = feedreelctl::Cli::parse();
    if let Err(err) = feedreelctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
