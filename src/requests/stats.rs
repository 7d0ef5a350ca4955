use crate::cores::CorePreference;

/// Point-in-time request counters.
///
/// `RequireLocal` requests count in the `*_local` fields, `PreferLocal` and
/// `PreferRemote` in the `*_remotable` fields. For each class, unfulfilled plus
/// fulfilled equals the number of live requests of that class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestStatistics {
    pub unfulfilled_local: usize,
    pub unfulfilled_remotable: usize,
    pub fulfilled_local: usize,
    pub fulfilled_remotable: usize,
}

impl RequestStatistics {
    /// Requests still waiting for a core.
    pub fn unfulfilled(&self) -> usize {
        self.unfulfilled_local + self.unfulfilled_remotable
    }

    /// Requests holding a core.
    pub fn fulfilled(&self) -> usize {
        self.fulfilled_local + self.fulfilled_remotable
    }

    /// All live requests.
    pub fn total(&self) -> usize {
        self.unfulfilled() + self.fulfilled()
    }

    pub(crate) fn record_created(&mut self, preference: CorePreference) {
        *self.unfulfilled_mut(preference) += 1;
    }

    pub(crate) fn record_fulfilled(&mut self, preference: CorePreference) {
        *self.unfulfilled_mut(preference) -= 1;
        *self.fulfilled_mut(preference) += 1;
    }

    pub(crate) fn record_released(&mut self, preference: CorePreference, fulfilled: bool) {
        if fulfilled {
            *self.fulfilled_mut(preference) -= 1;
        } else {
            *self.unfulfilled_mut(preference) -= 1;
        }
    }

    fn unfulfilled_mut(&mut self, preference: CorePreference) -> &mut usize {
        if preference.is_local_class() {
            &mut self.unfulfilled_local
        } else {
            &mut self.unfulfilled_remotable
        }
    }

    fn fulfilled_mut(&mut self, preference: CorePreference) -> &mut usize {
        if preference.is_local_class() {
            &mut self.fulfilled_local
        } else {
            &mut self.fulfilled_remotable
        }
    }
}
