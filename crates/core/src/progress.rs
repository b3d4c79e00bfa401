//! Timer-driven progress for long model calls.
//!
//! The model gives no progress signal, so the bar creeps towards a ceiling on a
//! fixed tick and only reaches 100% when the work actually finishes.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Drafting,
    AwaitingModel,
    Parsing,
    Done,
    Failed,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Drafting => "drafting prompt",
            Stage::AwaitingModel => "awaiting model",
            Stage::Parsing => "parsing reply",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub percent: u8,
    pub stage: Stage,
    #[serde(skip)]
    fraction: f64,
}

impl Progress {
    pub fn queued() -> Self {
        Self {
            percent: 0,
            stage: Stage::Queued,
            fraction: 0.0,
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    fn at(stage: Stage, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let percent = if stage == Stage::Done {
            100
        } else {
            // 100 is reserved for completion.
            ((fraction * 100.0).floor() as u8).min(99)
        };
        Self {
            percent,
            stage,
            fraction,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::queued()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressOptions {
    pub tick: Duration,
    pub ceiling: f64,
    pub step: f64,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(400),
            ceiling: 0.95,
            step: 0.08,
        }
    }
}

pub type ProgressSender = watch::Sender<Progress>;

pub fn channel() -> (ProgressSender, watch::Receiver<Progress>) {
    watch::channel(Progress::queued())
}

/// Moves to `stage`, never going backwards in fraction.
pub fn enter(tx: &ProgressSender, stage: Stage, floor: f64) {
    tx.send_modify(|p| {
        let fraction = p.fraction.max(floor);
        *p = Progress::at(stage, fraction);
    });
}

pub fn finish(tx: &ProgressSender, ok: bool) {
    tx.send_modify(|p| {
        *p = if ok {
            Progress::at(Stage::Done, 1.0)
        } else {
            Progress::at(Stage::Failed, p.fraction)
        };
    });
}

/// Runs `fut` under `stage`, nudging the published fraction towards
/// `opts.ceiling` on every tick while it is pending.
pub async fn drive<F, T>(fut: F, stage: Stage, opts: ProgressOptions, tx: &ProgressSender) -> T
where
    F: Future<Output = T>,
{
    enter(tx, stage, 0.0);

    let mut ticker = tokio::time::interval(opts.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return out,
            _ = ticker.tick() => {
                tx.send_modify(|p| {
                    let next = advance(p.fraction, opts);
                    *p = Progress::at(p.stage, next);
                });
            }
        }
    }
}

fn advance(fraction: f64, opts: ProgressOptions) -> f64 {
    if fraction >= opts.ceiling {
        return fraction;
    }
    (fraction + (opts.ceiling - fraction) * opts.step).min(opts.ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_approaches_but_never_exceeds_ceiling() {
        let opts = ProgressOptions::default();
        let mut f = 0.0;
        let mut last = f;
        for _ in 0..500 {
            f = advance(f, opts);
            assert!(f >= last);
            assert!(f <= opts.ceiling);
            last = f;
        }
        assert!(f > 0.94);
    }

    #[test]
    fn percent_caps_below_100_until_done() {
        assert_eq!(Progress::at(Stage::AwaitingModel, 1.0).percent, 99);
        assert_eq!(Progress::at(Stage::Done, 1.0).percent, 100);
    }

    #[test]
    fn enter_does_not_move_backwards() {
        let (tx, rx) = channel();
        enter(&tx, Stage::AwaitingModel, 0.5);
        enter(&tx, Stage::Parsing, 0.2);
        let p = *rx.borrow();
        assert_eq!(p.stage, Stage::Parsing);
        assert_eq!(p.percent, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_ticks_while_pending_and_returns_output() {
        let (tx, rx) = channel();
        let opts = ProgressOptions {
            tick: Duration::from_millis(100),
            ..ProgressOptions::default()
        };

        let out = drive(
            async {
                tokio::time::sleep(Duration::from_millis(1050)).await;
                42
            },
            Stage::AwaitingModel,
            opts,
            &tx,
        )
        .await;

        assert_eq!(out, 42);
        let p = *rx.borrow();
        assert_eq!(p.stage, Stage::AwaitingModel);
        // Ten ticks of 8% of the remaining distance to 95%.
        let mut expected = 0.0;
        for _ in 0..10 {
            expected = advance(expected, opts);
        }
        assert!((p.fraction() - expected).abs() < 1e-9);
        assert!(p.percent < 100);

        finish(&tx, true);
        assert_eq!(rx.borrow().percent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_last_fraction() {
        let (tx, rx) = channel();
        drive(
            tokio::time::sleep(Duration::from_secs(2)),
            Stage::AwaitingModel,
            ProgressOptions::default(),
            &tx,
        )
        .await;
        let before = rx.borrow().percent;
        finish(&tx, false);
        let p = *rx.borrow();
        assert_eq!(p.stage, Stage::Failed);
        assert_eq!(p.percent, before);
    }
}
