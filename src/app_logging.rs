// Copyright 2026 Pardosa Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Config;
use std::path::Path;

const PATTERN: &str = "{l}@Thread{I} - {d} - {m}{n}";

/// Configure console logging for the crate. The front-end owning the process
/// calls this once; library users bring their own log backend instead.
/// Level defaults to Info and can be overridden with `PARDOSA_LOG`.
pub fn configure_logging(log_file: Option<&Path>) {
    let level = std::env::var("PARDOSA_LOG")
        .ok()
        .and_then(|raw| raw.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let config = Config::builder();
    let config = match log_file {
        Some(path) => {
            let file_logger = FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(PATTERN)))
                .build(path);
            match file_logger {
                Ok(file_logger) => {
                    config.appender(Appender::builder().build("out", Box::new(file_logger)))
                }
                Err(err) => {
                    eprintln!("Cannot log to {}: {err}. Falling back to console.", path.display());
                    let console = ConsoleAppender::builder()
                        .encoder(Box::new(PatternEncoder::new(PATTERN)))
                        .build();
                    config.appender(Appender::builder().build("out", Box::new(console)))
                }
            }
        }
        None => {
            let console = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(PATTERN)))
                .build();
            config.appender(Appender::builder().build("out", Box::new(console)))
        }
    };

    let config = config
        .logger(Logger::builder().build("pardosa", level))
        .build(Root::builder().appender("out").build(LevelFilter::Warn));

    match config {
        Ok(config) => {
            // A second call keeps the first configuration; fine for tests.
            let _ = log4rs::init_config(config);
        }
        Err(err) => eprintln!("Logging configuration failed: {err}"),
    }
}
