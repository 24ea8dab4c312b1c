use std::io::BufRead;

use thermosync_config::{config_path, load_config, store_password};

use crate::cli::{ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(cmd: ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        ConfigCommand::Path => {
            output::print_output(&config_path().display().to_string());
        }
        ConfigCommand::SetPassword => {
            let cfg = load_config()?;
            let (name, _) = cfg.profile(global.profile.as_deref())?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let password = line.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "no password on stdin".into(),
                });
            }

            store_password(name, password)?;
            eprintln!("Password stored in keyring for profile '{name}'");
        }
    }
    Ok(())
}
