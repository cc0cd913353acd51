//! Interactive `watch` mode.
//!
//! Commands are read line by line from stdin: `r` refreshes, `n`/`p` page
//! forwards and back, `q` quits. A short key walkthrough is shown until
//! the user has used each key once; progress is persisted so an
//! interrupted walkthrough resumes where it left off.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::sync::mpsc;
use vicalert_aggregator::runner;
use vicalert_aggregator::view::IncidentView;
use vicalert_aggregator::{Aggregator, Phase};
use vicalert_feed::IncidentSource;
use vicalert_incident_models::Incident;
use vicalert_incident_models::clock::Clock;
use vicalert_storage::records::TutorialProgress;
use vicalert_storage::{KeyValueStore, keys, load_or_default, save};

use crate::render;

const WALKTHROUGH: &[&str] = &[
    "Type r and press Enter to refresh now.",
    "Type n or p and press Enter to page through incidents.",
    "Type q and press Enter to quit.",
];

/// A parsed stdin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Refresh,
    Next,
    Previous,
    Quit,
}

impl Key {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "r" => Some(Self::Refresh),
            "n" => Some(Self::Next),
            "p" => Some(Self::Previous),
            "q" => Some(Self::Quit),
            _ => None,
        }
    }

    /// Walkthrough step this key completes.
    const fn step(self) -> u32 {
        match self {
            Self::Refresh => 1,
            Self::Next | Self::Previous => 2,
            Self::Quit => 3,
        }
    }
}

/// Persisted walkthrough state.
struct Walkthrough {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    step: Option<u32>,
}

impl Walkthrough {
    fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let progress: TutorialProgress = load_or_default(store.as_ref(), keys::TUTORIAL_PROGRESS);
        let step = (!progress.completed).then(|| {
            progress
                .resume_step(clock.now_millis())
                .clamp(1, total_steps())
        });
        Self { store, clock, step }
    }

    fn hint(&self) -> Option<&'static str> {
        self.step
            .and_then(|step| WALKTHROUGH.get(usize::try_from(step - 1).ok()?))
            .copied()
    }

    fn advance(&mut self, key: Key) {
        let Some(step) = self.step else {
            return;
        };
        if key.step() != step {
            return;
        }

        let now = self.clock.now_millis();
        let progress = if step >= total_steps() {
            self.step = None;
            TutorialProgress::finished(total_steps(), now)
        } else {
            self.step = Some(step + 1);
            TutorialProgress::at_step(step + 1, now)
        };
        if let Err(e) = save(self.store.as_ref(), keys::TUTORIAL_PROGRESS, &progress) {
            log::warn!("Failed to save walkthrough progress: {e}");
        }
    }
}

fn total_steps() -> u32 {
    u32::try_from(WALKTHROUGH.len()).unwrap_or(u32::MAX)
}

type RedrawKey<'a> = (&'a [Incident], &'a [Incident], Phase, bool, bool, bool);

/// Fields that warrant a redraw. The countdown alone does not.
fn redraw_key(view: &IncidentView) -> RedrawKey<'_> {
    (
        view.incidents.as_slice(),
        view.pinned.as_slice(),
        view.phase,
        view.is_loading,
        view.is_error,
        view.is_stalled,
    )
}

/// Runs the aggregator until the user quits or stdin is closed.
///
/// # Errors
///
/// Returns an error if the aggregator task panicked.
pub async fn run(
    aggregator: Aggregator,
    source: Arc<dyn IncidentSource>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = runner::spawn(aggregator, source);
    let mut views = handle.views();
    let mut keys_rx = spawn_stdin_reader();
    let mut walkthrough = Walkthrough::load(store, clock);
    let mut page = 0usize;

    let mut shown = views.borrow_and_update().clone();
    draw(&shown, page, &walkthrough);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = views.borrow_and_update().clone();
                if redraw_key(&next) != redraw_key(&shown) {
                    draw(&next, page, &walkthrough);
                }
                shown = next;
            }
            key = keys_rx.recv() => {
                let Some(key) = key else {
                    log::debug!("stdin closed");
                    break;
                };
                walkthrough.advance(key);
                match key {
                    Key::Refresh => handle.refresh().await,
                    Key::Next => {
                        page = (page + 1).min(shown.total_pages() - 1);
                        draw(&shown, page, &walkthrough);
                    }
                    Key::Previous => {
                        page = page.saturating_sub(1);
                        draw(&shown, page, &walkthrough);
                    }
                    Key::Quit => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await?;
    Ok(())
}

fn draw(view: &IncidentView, page: usize, walkthrough: &Walkthrough) {
    println!();
    render::print_page(view, page);
    if let Some(hint) = walkthrough.hint() {
        println!("\nTip: {hint}");
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<Key> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(key) = Key::parse(&line)
                        && tx.send(key).await.is_err()
                    {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    log::warn!("Failed to read stdin: {e}");
                    return;
                }
            }
        }
    });
    rx
}
