//! Human-like mouse and scroll noise applied while a page settles.
//!
//! Appliers borrow the page for one iteration only and are rebuilt on the
//! next, so they never outlive a navigation or tab switch.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::browser::LivePage;
use crate::error::AgentError;

/// Points along a quadratic Bézier curve from `start` to `end` with a random
/// control point, `steps` points in total including the end point.
pub fn mouse_path<R: Rng>(
    rng: &mut R,
    start: (f64, f64),
    end: (f64, f64),
    steps: usize,
) -> Vec<(f64, f64)> {
    let steps = steps.max(1);
    let ctrl = (
        (start.0 + end.0) / 2.0 + rng.gen_range(-120.0..=120.0),
        (start.1 + end.1) / 2.0 + rng.gen_range(-120.0..=120.0),
    );
    (1..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let u = 1.0 - t;
            (
                u * u * start.0 + 2.0 * u * t * ctrl.0 + t * t * end.0,
                u * u * start.1 + 2.0 * u * t * ctrl.1 + t * t * end.1,
            )
        })
        .collect()
}

pub struct MouseJitter<'a> {
    page: &'a dyn LivePage,
    viewport: (f64, f64),
}

impl<'a> MouseJitter<'a> {
    pub fn new(page: &'a dyn LivePage) -> Self {
        Self {
            page,
            viewport: (1280.0, 800.0),
        }
    }

    pub async fn random_movement(&self) -> Result<(), AgentError> {
        // Sample everything before the first await; the thread RNG is not Send.
        let (path, pauses) = {
            let mut rng = rand::thread_rng();
            let start = (
                rng.gen_range(0.0..self.viewport.0),
                rng.gen_range(0.0..self.viewport.1),
            );
            let end = (
                rng.gen_range(0.0..self.viewport.0),
                rng.gen_range(0.0..self.viewport.1),
            );
            let steps = rng.gen_range(8..20);
            let path = mouse_path(&mut rng, start, end, steps);
            let pauses: Vec<u64> = (0..path.len()).map(|_| rng.gen_range(5..25)).collect();
            (path, pauses)
        };
        for ((x, y), pause) in path.into_iter().zip(pauses) {
            self.page.mouse_move(x, y).await?;
            sleep(Duration::from_millis(pause)).await;
        }
        Ok(())
    }
}

pub struct ScrollJitter<'a> {
    page: &'a dyn LivePage,
}

impl<'a> ScrollJitter<'a> {
    pub fn new(page: &'a dyn LivePage) -> Self {
        Self { page }
    }

    /// A few small scrolls down then partly back up.
    pub async fn apply(&self) -> Result<(), AgentError> {
        let deltas: Vec<(i64, u64)> = {
            let mut rng = rand::thread_rng();
            let n = rng.gen_range(2..5);
            let mut v: Vec<(i64, u64)> = (0..n)
                .map(|_| (rng.gen_range(40..220), rng.gen_range(30..120)))
                .collect();
            v.push((-rng.gen_range(20..120), rng.gen_range(30..120)));
            v
        };
        for (dy, pause) in deltas {
            self.page
                .evaluate(&format!("window.scrollBy(0, {dy})"))
                .await?;
            sleep(Duration::from_millis(pause)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn path_ends_exactly_at_target() {
        let mut rng = StdRng::seed_from_u64(7);
        let path = mouse_path(&mut rng, (0.0, 0.0), (300.0, 200.0), 12);
        assert_eq!(path.len(), 12);
        let last = path[path.len() - 1];
        assert!((last.0 - 300.0).abs() < 1e-9);
        assert!((last.1 - 200.0).abs() < 1e-9);
    }

    #[test]
    fn zero_steps_still_reaches_target() {
        let mut rng = StdRng::seed_from_u64(1);
        let path = mouse_path(&mut rng, (10.0, 10.0), (20.0, 20.0), 0);
        assert_eq!(path.len(), 1);
    }
}
