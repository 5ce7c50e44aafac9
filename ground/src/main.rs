use ground::tool;
use jeflog::fail;
use std::{path::PathBuf, process};

fn main() -> anyhow::Result<()> {
  let matches = ground::command().get_matches();

  match matches.subcommand() {
    Some(("run", args)) => tool::run(args)?,
    Some(("decode", args)) => {
      tool::decode(args.get_one::<PathBuf>("capture").unwrap())?
    }
    Some(("emulate", args)) => tool::emulate(
      args.get_one::<PathBuf>("output").unwrap(),
      *args.get_one::<f64>("frequency").unwrap(),
      args.get_one::<f64>("duration").copied(),
    )?,
    _ => {
      fail!("Invalid command. Please check the command you entered.");
      process::exit(1);
    }
  };

  Ok(())
}
