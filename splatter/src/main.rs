use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use structopt::StructOpt;

use splatter::aggregate_colors::AggregateColorsCommand;
use splatter::render_views::RenderViewsCommand;
use splatter::run::RunCommand;

#[derive(StructOpt)]
#[structopt(about = "Mesh color splatting and rendering")]
struct Opts {
    #[structopt(help = "Log debug messages", long, short = "v")]
    verbose: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    Run(RunCommand),
    Render(RenderViewsCommand),
    Aggregate(AggregateColorsCommand),
}

fn main() {
    let opts = Opts::from_args();

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to init logger: {}", err);
    }

    let res = match opts.command {
        Command::Run(command) => command.run(),
        Command::Render(command) => command.run(),
        Command::Aggregate(command) => command.run(),
    };

    if let Err(err) = res {
        eprintln!("error: {:?}", err);
        std::process::exit(1);
    }
}
