//! Keyboard state with per-frame edge detection.

use std::collections::HashSet;

use winit::event::{ElementState, KeyEvent};
use winit::keyboard::PhysicalKey;

pub use winit::keyboard::KeyCode;

/// Which keys are held, and which changed since the last [`Keyboard::end_frame`].
#[derive(Debug, Default)]
pub struct Keyboard {
    held: HashSet<KeyCode>,
    pressed: HashSet<KeyCode>,
    released: HashSet<KeyCode>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a `KeyboardInput` event. Auto-repeat is ignored.
    pub fn handle_event(&mut self, event: &KeyEvent) {
        if event.repeat {
            return;
        }
        if let PhysicalKey::Code(code) = event.physical_key {
            self.set(code, event.state);
        }
    }

    /// Applies a key transition.
    pub fn set(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.held.insert(key) {
                    self.pressed.insert(key);
                }
            }
            ElementState::Released => {
                if self.held.remove(&key) {
                    self.released.insert(key);
                }
            }
        }
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    /// True only in the frame the key went down.
    pub fn was_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    pub fn was_released(&self, key: KeyCode) -> bool {
        self.released.contains(&key)
    }

    /// Clears the edge sets. Call once per drawn frame.
    pub fn end_frame(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_is_edge_triggered() {
        let mut keyboard = Keyboard::new();
        keyboard.set(KeyCode::KeyS, ElementState::Pressed);
        assert!(keyboard.was_pressed(KeyCode::KeyS));
        assert!(keyboard.is_held(KeyCode::KeyS));

        keyboard.end_frame();
        assert!(!keyboard.was_pressed(KeyCode::KeyS));
        assert!(keyboard.is_held(KeyCode::KeyS));

        // Still held, so a second press event is not a new edge.
        keyboard.set(KeyCode::KeyS, ElementState::Pressed);
        assert!(!keyboard.was_pressed(KeyCode::KeyS));
    }

    #[test]
    fn test_release() {
        let mut keyboard = Keyboard::new();
        keyboard.set(KeyCode::Escape, ElementState::Pressed);
        keyboard.end_frame();
        keyboard.set(KeyCode::Escape, ElementState::Released);
        assert!(keyboard.was_released(KeyCode::Escape));
        assert!(!keyboard.is_held(KeyCode::Escape));
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut keyboard = Keyboard::new();
        keyboard.set(KeyCode::KeyA, ElementState::Released);
        assert!(!keyboard.was_released(KeyCode::KeyA));
    }
}
