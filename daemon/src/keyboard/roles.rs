//! Key role classification
//!
//! Partitions the keycodes of the live keyboard layout into the overloaded
//! target key, the real modifier keys and the Super keys. Built once at
//! startup from the unmodified (first column) keysym of every keycode.

use std::fmt;
use std::ops::RangeInclusive;

use super::session::SessionError;

/// Raw X11 keycode, scoped to the local keyboard
pub type KeyCode = u8;

/// Raw X11 keysym
pub type Keysym = u32;

/// Keysym values used for classification (from `X11/keysymdef.h`)
pub mod keysyms {
    use super::Keysym;

    pub const NO_SYMBOL: Keysym = 0x0000;
    pub const SPACE: Keysym = 0x0020;

    pub const SHIFT_L: Keysym = 0xffe1;
    pub const SHIFT_R: Keysym = 0xffe2;
    pub const CONTROL_L: Keysym = 0xffe3;
    pub const CONTROL_R: Keysym = 0xffe4;
    pub const META_L: Keysym = 0xffe7;
    pub const META_R: Keysym = 0xffe8;
    pub const ALT_L: Keysym = 0xffe9;
    pub const ALT_R: Keysym = 0xffea;
    pub const SUPER_L: Keysym = 0xffeb;
    pub const SUPER_R: Keysym = 0xffec;
    pub const HYPER_L: Keysym = 0xffed;
    pub const HYPER_R: Keysym = 0xffee;

    pub const ISO_LEVEL3_SHIFT: Keysym = 0xfe03;
    pub const ISO_NEXT_GROUP: Keysym = 0xfe08;
    pub const ISO_PREV_GROUP: Keysym = 0xfe0a;
    pub const ISO_FIRST_GROUP: Keysym = 0xfe0c;
    pub const ISO_LAST_GROUP: Keysym = 0xfe0e;
    pub const ISO_LEVEL5_SHIFT: Keysym = 0xfe11;
    /// Alias of `Mode_switch`
    pub const ISO_GROUP_SHIFT: Keysym = 0xff7e;
}

/// Semantic role of a keycode in the current layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// The overloaded key
    Target,
    /// Shift, Control, Alt, Hyper and the ISO level/group shifts
    Modifier,
    /// Super or Meta
    Super,
    /// Everything else
    #[default]
    Other,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Target => write!(f, "Target"),
            Role::Modifier => write!(f, "Modifier"),
            Role::Super => write!(f, "Super"),
            Role::Other => write!(f, "Other"),
        }
    }
}

/// Whether `keysym` is held as part of a key combination.
///
/// Locks and latches are excluded since they are not held.
pub fn is_modifier_keysym(keysym: Keysym) -> bool {
    use keysyms::*;

    matches!(
        keysym,
        SHIFT_L
            | SHIFT_R
            | CONTROL_L
            | CONTROL_R
            | ALT_L
            | ALT_R
            | HYPER_L
            | HYPER_R
            | ISO_LEVEL3_SHIFT
            | ISO_LEVEL5_SHIFT
            | ISO_GROUP_SHIFT
            | ISO_NEXT_GROUP
            | ISO_PREV_GROUP
            | ISO_FIRST_GROUP
            | ISO_LAST_GROUP
    )
}

pub fn is_super_keysym(keysym: Keysym) -> bool {
    use keysyms::*;

    matches!(keysym, SUPER_L | SUPER_R | META_L | META_R)
}

/// Immutable keycode -> role table
#[derive(Clone, PartialEq, Eq)]
pub struct RoleSet {
    roles: [Role; 256],
    target: KeyCode,
}

impl RoleSet {
    /// Classify every keycode in `keycodes` using its unmodified keysym.
    ///
    /// The target is tagged last so it wins over whatever the layout
    /// currently binds to it (normally Super after remapping).
    pub fn classify<F>(target: KeyCode, keycodes: RangeInclusive<KeyCode>, mut keysym_of: F) -> Self
    where
        F: FnMut(KeyCode) -> Keysym,
    {
        let mut roles = [Role::Other; 256];

        for code in keycodes {
            let keysym = keysym_of(code);
            roles[usize::from(code)] = if is_super_keysym(keysym) {
                Role::Super
            } else if is_modifier_keysym(keysym) {
                Role::Modifier
            } else {
                Role::Other
            };
        }

        roles[usize::from(target)] = Role::Target;

        Self { roles, target }
    }

    /// Role of a keycode
    pub fn role(&self, code: KeyCode) -> Role {
        self.roles[usize::from(code)]
    }

    /// The overloaded key's code
    pub fn target(&self) -> KeyCode {
        self.target
    }

    /// All keycodes carrying `role`, ascending
    pub fn codes(&self, role: Role) -> Vec<KeyCode> {
        (KeyCode::MIN..=KeyCode::MAX)
            .filter(|&code| self.role(code) == role)
            .collect()
    }
}

impl fmt::Debug for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleSet")
            .field("target", &self.target)
            .field("modifiers", &self.codes(Role::Modifier))
            .field("supers", &self.codes(Role::Super))
            .finish()
    }
}

/// How the synthetic tap key is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapKey {
    /// A keycode given explicitly
    Keycode(KeyCode),
    /// The keycode the layout currently binds to this keysym
    Keysym(Keysym),
}

/// Snapshot of the core keyboard mapping
#[derive(Debug, Clone)]
pub struct KeyboardMapping {
    pub(crate) min_keycode: KeyCode,
    pub(crate) max_keycode: KeyCode,
    pub(crate) keysyms_per_keycode: usize,
    pub(crate) keysyms: Vec<Keysym>,
}

impl KeyboardMapping {
    pub fn keycodes(&self) -> RangeInclusive<KeyCode> {
        self.min_keycode..=self.max_keycode
    }

    /// Keysym at `column` for `code`, `NoSymbol` when unbound
    pub fn keysym_at(&self, code: KeyCode, column: usize) -> Keysym {
        if !self.keycodes().contains(&code) || column >= self.keysyms_per_keycode {
            return keysyms::NO_SYMBOL;
        }
        let index = usize::from(code - self.min_keycode) * self.keysyms_per_keycode + column;
        self.keysyms.get(index).copied().unwrap_or(keysyms::NO_SYMBOL)
    }

    /// Unmodified keysym for `code`
    pub fn keysym(&self, code: KeyCode) -> Keysym {
        self.keysym_at(code, 0)
    }

    /// First keycode producing `keysym`, searching column by column
    pub fn keycode_of(&self, keysym: Keysym) -> Option<KeyCode> {
        if keysym == keysyms::NO_SYMBOL {
            return None;
        }
        (0..self.keysyms_per_keycode).find_map(|column| {
            self.keycodes()
                .find(|&code| self.keysym_at(code, column) == keysym)
        })
    }

    fn check_keycode(&self, keycode: KeyCode) -> Result<(), SessionError> {
        if self.keycodes().contains(&keycode) {
            Ok(())
        } else {
            Err(SessionError::KeycodeOutOfRange {
                keycode,
                min: self.min_keycode,
                max: self.max_keycode,
            })
        }
    }

    /// Resolve the target and tap keys and classify the layout.
    ///
    /// Returns the role table and the tap keycode.
    pub fn resolve(&self, target: KeyCode, tap: TapKey) -> Result<(RoleSet, KeyCode), SessionError> {
        self.check_keycode(target)?;
        if self.keysym(target) == keysyms::NO_SYMBOL {
            return Err(SessionError::TargetUnmapped { keycode: target });
        }

        let tap_keycode = match tap {
            TapKey::Keycode(code) => {
                self.check_keycode(code)?;
                code
            }
            TapKey::Keysym(keysym) => self
                .keycode_of(keysym)
                .ok_or(SessionError::TapKeysymUnmapped { keysym })?,
        };

        let roles = RoleSet::classify(target, self.keycodes(), |code| self.keysym(code));
        Ok((roles, tap_keycode))
    }
}
