mod aes;
mod calculator;
mod gf;
mod logging;
mod mitm;
mod options;

use options::MitmOptions;
use structopt::StructOpt;

fn main() {
    match MitmOptions::from_args() {
        MitmOptions::FourRound { limit } => {
            mitm::four_round::run(limit);
        }
        MitmOptions::SevenRound { threads, limit } => {
            let threads = threads.unwrap_or_else(num_cpus::get).max(1);
            mitm::seven_round::run(threads, limit);
        }
        MitmOptions::SevenDeep { limit } => {
            mitm::seven_deep::run(limit);
        }
        MitmOptions::Calc => {
            if let Err(err) = calculator::run() {
                logging::error(&format!("Calculator failed: {}", err));
            }
        }
    }
}
