//! Which work-group/work-item the user is looking at

use wavepoint_common::{parse_dim_argument, Error, Result, WaveDim3, WaveInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    /// Focus was unknown and has been accepted without validation
    Bootstrapped,
    Changed,
    Unchanged,
    /// The coordinate names no live lane
    Rejected,
}

impl FocusChange {
    /// Whether the user should be told about the new focus
    pub fn is_visible(self) -> bool {
        matches!(self, FocusChange::Bootstrapped | FocusChange::Changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusTracker {
    work_group: WaveDim3,
    work_item: WaveDim3,
}

impl Default for FocusTracker {
    fn default() -> Self {
        Self {
            work_group: WaveDim3::UNKNOWN,
            work_item: WaveDim3::UNKNOWN,
        }
    }
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> (WaveDim3, WaveDim3) {
        (self.work_group, self.work_item)
    }

    pub fn is_unknown(&self) -> bool {
        self.work_group.is_unknown() || self.work_item.is_unknown()
    }

    /// Move focus to `(work_group, work_item)`.
    ///
    /// While focus is unknown the wave table may not be published yet, so the
    /// first focus is taken as given. After that the pair must name an
    /// executing lane in `waves`.
    pub fn set_focus(
        &mut self,
        work_group: WaveDim3,
        work_item: WaveDim3,
        waves: &[WaveInfo],
    ) -> FocusChange {
        if self.is_unknown() {
            self.work_group = work_group;
            self.work_item = work_item;
            return FocusChange::Bootstrapped;
        }

        if !is_active(waves, work_group, work_item) {
            return FocusChange::Rejected;
        }
        if self.current() == (work_group, work_item) {
            return FocusChange::Unchanged;
        }
        self.work_group = work_group;
        self.work_item = work_item;
        FocusChange::Changed
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// The wave holding the focused lane, if it is live
    pub fn focused_wave<'w>(&self, waves: &'w [WaveInfo]) -> Option<&'w WaveInfo> {
        waves
            .iter()
            .find(|w| w.has_active_lane(self.work_group, self.work_item))
    }

    pub fn describe(&self) -> String {
        format!(
            "Switching to work-group ({}) and work-item ({})",
            self.work_group, self.work_item
        )
    }
}

/// True if some wave has `(work_group, work_item)` executing
pub fn is_active(waves: &[WaveInfo], work_group: WaveDim3, work_item: WaveDim3) -> bool {
    waves.iter().any(|w| w.has_active_lane(work_group, work_item))
}

/// Parse the focus-switch arguments `wg:x,y,z wi:x,y,z`
pub fn parse_focus_args(args: &str) -> Result<(WaveDim3, WaveDim3)> {
    // "wg:0,0,0" is the shortest text that can carry either group
    if args.trim().len() < 8 {
        return Err(Error::FocusSyntax(format!("\"{}\" is too short", args)));
    }
    let work_group = parse_dim_argument(args, "wg")
        .ok_or_else(|| Error::FocusSyntax("missing wg:x,y,z".to_string()))?;
    let work_item = parse_dim_argument(args, "wi")
        .ok_or_else(|| Error::FocusSyntax("missing wi:x,y,z".to_string()))?;
    Ok((work_group, work_item))
}
