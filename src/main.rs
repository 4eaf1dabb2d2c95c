use std::env;
use std::io;
use std::path::Path;

use anyhow::Result;

use billsort::app;
use billsort::categorizing::prompter::ConsolePrompter;
use billsort::categorizing::Prompter;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() > 2 {
        eprintln!("Usage: billsort [input_file]");
        std::process::exit(1);
    }

    let run_dir = env::current_dir()?;
    let mut prompter = Prompter::from(ConsolePrompter::stdio());
    app::run(&run_dir, args.get(1).map(Path::new), &mut prompter, &mut io::stdout())?;

    Ok(())
}
