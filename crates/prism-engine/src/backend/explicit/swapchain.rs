//! Swapchain generation state.
//!
//! `Valid` holds a generation that matches the surface. Anything that may
//! make it stale (a resize, an out-of-date acquire, a suboptimal present)
//! moves it to `Invalid`; the next frame with a non-zero framebuffer waits
//! for the device to idle, destroys the old generation and builds a new one.

use std::mem;

#[derive(Debug)]
pub enum SwapchainState<G> {
    Valid(G),
    /// Holds the stale generation until it can be destroyed, if any.
    Invalid(Option<G>),
}

#[derive(Debug)]
pub struct Swapchain<G> {
    state: SwapchainState<G>,
    installed: bool,
    rebuilds: u64,
}

impl<G> Default for Swapchain<G> {
    fn default() -> Self {
        Self { state: SwapchainState::Invalid(None), installed: false, rebuilds: 0 }
    }
}

impl<G> Swapchain<G> {
    pub fn is_valid(&self) -> bool {
        matches!(self.state, SwapchainState::Valid(_))
    }

    /// The live generation, stale or not.
    pub fn generation(&self) -> Option<&G> {
        match &self.state {
            SwapchainState::Valid(g) | SwapchainState::Invalid(Some(g)) => Some(g),
            SwapchainState::Invalid(None) => None,
        }
    }

    pub fn generation_mut(&mut self) -> Option<&mut G> {
        match &mut self.state {
            SwapchainState::Valid(g) | SwapchainState::Invalid(Some(g)) => Some(g),
            SwapchainState::Invalid(None) => None,
        }
    }

    /// Generations installed after the first one.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn invalidate(&mut self, reason: &str) {
        self.state = match mem::replace(&mut self.state, SwapchainState::Invalid(None)) {
            SwapchainState::Valid(g) => {
                log::debug!("swapchain invalidated: {reason}");
                SwapchainState::Invalid(Some(g))
            }
            stale => stale,
        };
    }

    /// Removes the stale generation so it can be destroyed.
    pub fn take(&mut self) -> Option<G> {
        match mem::replace(&mut self.state, SwapchainState::Invalid(None)) {
            SwapchainState::Valid(g) | SwapchainState::Invalid(Some(g)) => Some(g),
            SwapchainState::Invalid(None) => None,
        }
    }

    /// Installs a freshly built generation. The previous one must already
    /// have been taken.
    pub fn install(&mut self, generation: G) {
        debug_assert!(self.generation().is_none(), "previous generation was not taken");
        if self.installed {
            self.rebuilds += 1;
        }
        self.installed = true;
        self.state = SwapchainState::Valid(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_invalid_and_empty() {
        let chain = Swapchain::<u32>::default();
        assert!(!chain.is_valid());
        assert!(chain.generation().is_none());
    }

    #[test]
    fn invalidation_keeps_the_stale_generation() {
        let mut chain = Swapchain::default();
        chain.install(1u32);
        chain.invalidate("resize");
        assert!(!chain.is_valid());
        assert_eq!(chain.generation(), Some(&1));

        assert_eq!(chain.take(), Some(1));
        chain.install(2);
        assert!(chain.is_valid());
        assert_eq!(chain.rebuilds(), 1);
    }

    #[test]
    fn invalidating_twice_is_harmless() {
        let mut chain = Swapchain::default();
        chain.install(7u32);
        chain.invalidate("suboptimal");
        chain.invalidate("out of date");
        assert_eq!(chain.take(), Some(7));
        assert_eq!(chain.take(), None);
    }
}
