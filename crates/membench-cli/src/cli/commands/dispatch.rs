use super::super::args::*;
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Sweep(args) => super::sweep::run(args, cli.log_format).await,
        Command::RunInstance(args) => super::run_instance::run(args).await,
        Command::Status(args) => super::status::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
