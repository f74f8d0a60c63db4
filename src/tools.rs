use crate::error::{AfResult, ArrayForgeError};
use crate::scenario::SiteModel;
use geo::Coord;

/// A post-placement check run against a configured layout.
pub trait ConstraintTool {
    fn configure(&mut self, layout: &[Coord<f64>]);
    fn execute(&self, site: &SiteModel) -> AfResult<()>;
}

/// Pairwise minimum separation check. Two devices violate the constraint
/// when their offset falls strictly inside the separation ellipse.
#[derive(Debug, Clone, Default)]
pub struct SpacingCheck {
    layout: Vec<Coord<f64>>,
}

impl SpacingCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_violations(&self, min_separation: (f64, f64)) -> usize {
        let (a, b) = min_separation;
        let mut count = 0;
        for (i, p) in self.layout.iter().enumerate() {
            for q in &self.layout[i + 1..] {
                let dx = (p.x - q.x) / a;
                let dy = (p.y - q.y) / b;
                if dx * dx + dy * dy < 1.0 - 1e-9 {
                    count += 1;
                }
            }
        }
        count
    }
}

impl ConstraintTool for SpacingCheck {
    fn configure(&mut self, layout: &[Coord<f64>]) {
        self.layout = layout.to_vec();
    }

    fn execute(&self, site: &SiteModel) -> AfResult<()> {
        match self.count_violations(site.min_separation) {
            0 => Ok(()),
            count => Err(ArrayForgeError::SpacingViolation { count }),
        }
    }
}
