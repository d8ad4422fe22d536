use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::process::ExitCode;

use modbam_rs::{
    bam_mods, peek, read_info, seq_table, simulate_mod_bam, window_reads, Error, QueryOptions,
    Result, WindowOptions,
};

const USAGE: &str = "usage:
    modbam-rs peek <bam_path>
    modbam-rs read-info <options.json>
    modbam-rs bam-mods <options.json>
    modbam-rs window-reads <options.json>
    modbam-rs seq-table <options.json>
    modbam-rs simulate <config.json> <out.bam|out.sam[.gz]> <out.fa>";

fn spinner(msg: &str, colour: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&format!("{{spinner:.{colour}}} {{msg}}"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(msg.to_string());
    spinner
}

fn load_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| Error::config(format!("invalid options in {path}: {e}")))
}

fn run(args: &[String]) -> Result<String> {
    let arg = |i: usize| {
        args.get(i)
            .map(String::as_str)
            .ok_or_else(|| Error::config(USAGE))
    };
    let command = arg(1)?;
    let bar = spinner(&format!("Running {command}..."), "blue");
    let out = match command {
        "peek" => serde_json::to_string_pretty(&peek(arg(2)?, false)?)?,
        "read-info" => serde_json::to_string_pretty(&read_info(&load_json::<QueryOptions>(arg(2)?)?)?)?,
        "bam-mods" => serde_json::to_string_pretty(&bam_mods(&load_json::<QueryOptions>(arg(2)?)?)?)?,
        "window-reads" => window_reads(&load_json::<WindowOptions>(arg(2)?)?)?,
        "seq-table" => seq_table(&load_json::<QueryOptions>(arg(2)?)?)?,
        "simulate" => {
            let config = fs::read_to_string(arg(2)?)?;
            simulate_mod_bam(&config, arg(3)?, arg(4)?)?;
            String::new()
        }
        _ => return Err(Error::config(USAGE)),
    };
    bar.finish_with_message(format!("{command} finished."));
    Ok(out)
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(out) => {
            if !out.is_empty() {
                println!("{}", out.trim_end());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
