use crate::cli::ConfigAction;
use crate::config::{AggregatorSettings, Config};
use anyhow::{Context, Result};
use std::collections::HashMap;

pub fn run(action: ConfigAction) -> Result<()> {
    let mut config = Config::load();

    match action {
        ConfigAction::Show => {
            match Config::path() {
                Some(path) => println!("# {}", path.display()),
                None => println!("# no config directory available"),
            }
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        ConfigAction::Set { key, value } => {
            // reject values the aggregators would refuse later
            let probe: HashMap<String, String> = [(key.clone(), value.clone())].into_iter().collect();
            AggregatorSettings::from_map(&probe).context("Refusing to save setting")?;
            config.settings.insert(key, value);
        }
        ConfigAction::Unset { key } => {
            config.settings.remove(&key);
        }
        ConfigAction::ProgressInterval { interval } => {
            config.progress_interval = interval.max(1);
        }
    }

    let path = config.save()?;
    println!("Saved {}", path.display());
    Ok(())
}
