//! Advisory cache of the current program scene.
//!
//! Toggling a source's visibility needs a scene name to scope the lookup.
//! Asking OBS every time costs a round trip, so the bridge remembers the last
//! scene it saw.  The cache is advisory: it can be stale between an event and
//! its use, and nothing relies on it for correctness.
//!
//! # Pending switches
//!
//! When the bridge itself switches scenes it records the target as *pending*
//! before sending the request, because the `CurrentProgramSceneChanged` echo
//! may lag behind the next command.  The next scene event reconciles the
//! pending entry:
//!
//! ```text
//! begin_switch("B")          current() == "B"   (pending)
//! reconcile("B")  → Confirmed  current() == "B"  (confirmed)
//!
//! begin_switch("B")
//! reconcile("C")  → Superseded { pending: "B" }  current() == "C"
//! ```

/// What a scene event did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// No switch was pending; the event simply updated the scene.
    Observed,
    /// The event confirmed the pending switch.
    Confirmed,
    /// A different scene won; the pending switch was discarded.
    Superseded {
        /// The scene the bridge had asked for.
        pending: String,
    },
}

/// Last known program scene plus an optional unconfirmed switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneCache {
    confirmed: Option<String>,
    pending: Option<String>,
}

impl SceneCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Best guess of the current scene: the pending switch if any, otherwise
    /// the last confirmed scene.
    pub fn current(&self) -> Option<&str> {
        self.pending.as_deref().or(self.confirmed.as_deref())
    }

    /// The last scene reported by OBS itself.
    pub fn confirmed(&self) -> Option<&str> {
        self.confirmed.as_deref()
    }

    /// The switch the bridge requested but OBS has not yet echoed.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Records an outgoing scene switch before the request is sent.
    pub fn begin_switch(&mut self, scene: impl Into<String>) {
        self.pending = Some(scene.into());
    }

    /// Drops a pending switch whose request failed.
    ///
    /// Only clears the entry if it still refers to `scene`; a newer switch
    /// issued in the meantime is left alone.
    pub fn abandon(&mut self, scene: &str) {
        if self.pending.as_deref() == Some(scene) {
            self.pending = None;
        }
    }

    /// Applies an authoritative scene value: an event from OBS, or the answer
    /// to `GetCurrentProgramScene`.
    pub fn reconcile(&mut self, scene: impl Into<String>) -> Reconciliation {
        let scene = scene.into();
        let outcome = match self.pending.take() {
            None => Reconciliation::Observed,
            Some(pending) if pending == scene => Reconciliation::Confirmed,
            Some(pending) => Reconciliation::Superseded { pending },
        };
        self.confirmed = Some(scene);
        outcome
    }

    /// Forgets everything, e.g. after the control-plane connection drops.
    pub fn clear(&mut self) {
        self.confirmed = None;
        self.pending = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
