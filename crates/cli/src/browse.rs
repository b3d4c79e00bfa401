use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use stockdeck_core::domain::equity::EquityProfile;
use stockdeck_core::domain::slide::Slide;
use stockdeck_core::insight::{InsightKey, InsightPanel};

use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nav {
    Go(Slide),
    Quit,
    Help,
}

pub fn parse_nav(input: &str, current: Slide) -> Nav {
    match input.trim() {
        "q" | "quit" | "exit" => Nav::Quit,
        "n" | "next" | "" => Nav::Go(current.next()),
        "p" | "prev" => Nav::Go(current.prev()),
        other => match other.parse::<Slide>() {
            Ok(s) => Nav::Go(s),
            Err(_) => Nav::Help,
        },
    }
}

/// Steps through one entry's deck from stdin, printing commentary as the
/// panel settles.
pub async fn run(profile: EquityProfile, panel: InsightPanel) -> anyhow::Result<()> {
    let mut states = panel.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current = Slide::Overview;

    println!("{}", render::slide(&profile, current));
    panel.select(InsightKey::new(&profile.ticker, current)).await;
    print_help();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_nav(&line, current) {
                    Nav::Quit => break,
                    Nav::Help => print_help(),
                    Nav::Go(slide) => {
                        current = slide;
                        println!("{}", render::slide(&profile, current));
                        panel.select(InsightKey::new(&profile.ticker, current)).await;
                    }
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if let Some(text) = render::insight(&state) {
                    println!("{text}");
                }
            }
        }
    }
    Ok(())
}

fn print_help() {
    eprintln!("n = next, p = previous, <slide name> = jump, q = quit");
}
