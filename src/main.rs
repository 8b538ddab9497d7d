use clap::Parser;
use framecheck::cli::Cli;
use framecheck::verdict::FAILED;
use framecheck::{logging, Report};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Help and version exit 0; usage errors exit 1.
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    logging::init(cli.verbosity());
    let json = cli.json;

    match framecheck::run(cli.into_config()).await {
        Ok(report) => {
            if json {
                print_json(&report);
            }
            println!("{}", report.verdict_line());
            std::process::exit(report.exit_code());
        }
        Err(error) => {
            eprintln!("{}", error.diagnostic());
            println!("{FAILED}");
            std::process::exit(1);
        }
    }
}

fn print_json(report: &Report) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("error: cannot encode report: {e}"),
    }
}
