//! Keyboard classification against a fixed, ordered rule table.
//!
//! Classification is a pure lookup. Suppressing the browser default,
//! emitting events and raising the violation banner are the caller's job
//! (see [`super::layers`]).

use serde::{Deserialize, Serialize};

/// Raw keyboard event descriptor as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl KeyInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Ctrl on most platforms, Cmd on macOS.
    fn command(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Action a blocked key combination would have performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockedAction {
    Print,
    Save,
    Copy,
    SelectAll,
    ViewSource,
    Devtools,
    Console,
    Inspect,
    Screenshot,
}

impl BlockedAction {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Save => "save",
            Self::Copy => "copy",
            Self::SelectAll => "select-all",
            Self::ViewSource => "view-source",
            Self::Devtools => "devtools",
            Self::Console => "console",
            Self::Inspect => "inspect",
            Self::Screenshot => "screenshot",
        }
    }

    /// Banner text shown when this action is blocked.
    pub fn violation_message(self) -> String {
        format!("{} is disabled", self.tag())
    }
}

impl std::fmt::Display for BlockedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block(BlockedAction),
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Required,
    Irrelevant,
}

#[derive(Debug, Clone, Copy)]
enum Shift {
    Present,
    Absent,
    Irrelevant,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    command: Command,
    shift: Shift,
    key: &'static str,
    action: BlockedAction,
}

impl Rule {
    const fn command(shift: Shift, key: &'static str, action: BlockedAction) -> Self {
        Self {
            command: Command::Required,
            shift,
            key,
            action,
        }
    }

    fn matches(&self, input: &KeyInput) -> bool {
        let command_ok = match self.command {
            Command::Required => input.command(),
            Command::Irrelevant => true,
        };
        let shift_ok = match self.shift {
            Shift::Present => input.shift,
            Shift::Absent => !input.shift,
            Shift::Irrelevant => true,
        };
        command_ok && shift_ok && input.key.eq_ignore_ascii_case(self.key)
    }
}

/// First match wins. Shifted combinations precede their unshifted
/// counterparts so ctrl+shift+C is never read as copy.
const RULES: &[Rule] = &[
    Rule::command(Shift::Present, "i", BlockedAction::Devtools),
    Rule::command(Shift::Present, "j", BlockedAction::Console),
    Rule::command(Shift::Present, "c", BlockedAction::Inspect),
    Rule::command(Shift::Present, "s", BlockedAction::Screenshot),
    Rule::command(Shift::Absent, "p", BlockedAction::Print),
    Rule::command(Shift::Absent, "s", BlockedAction::Save),
    Rule::command(Shift::Absent, "c", BlockedAction::Copy),
    Rule::command(Shift::Absent, "a", BlockedAction::SelectAll),
    Rule::command(Shift::Absent, "u", BlockedAction::ViewSource),
    Rule {
        command: Command::Irrelevant,
        shift: Shift::Irrelevant,
        key: "F12",
        action: BlockedAction::Devtools,
    },
];

/// Classify a keydown against the rule table.
pub fn classify(input: &KeyInput) -> Verdict {
    RULES
        .iter()
        .find(|rule| rule.matches(input))
        .map_or(Verdict::Allow, |rule| Verdict::Block(rule.action))
}

/// PrintScreen is handled outside the table: it fires on both press and release.
pub fn is_print_screen(input: &KeyInput) -> bool {
    matches!(input.key.as_str(), "PrintScreen" | "Snapshot")
}

/// The OS key that opens platform menus and screenshot tools.
pub fn is_platform_menu_key(input: &KeyInput) -> bool {
    matches!(input.key.as_str(), "Meta" | "OS" | "Super" | "Win")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(input: KeyInput) -> Option<BlockedAction> {
        match classify(&input) {
            Verdict::Block(action) => Some(action),
            Verdict::Allow => None,
        }
    }

    #[test]
    fn listed_combinations_are_blocked() {
        let cases = [
            (KeyInput::new("p").ctrl(), BlockedAction::Print),
            (KeyInput::new("s").ctrl(), BlockedAction::Save),
            (KeyInput::new("c").ctrl(), BlockedAction::Copy),
            (KeyInput::new("a").ctrl(), BlockedAction::SelectAll),
            (KeyInput::new("u").ctrl(), BlockedAction::ViewSource),
            (KeyInput::new("I").ctrl().shift(), BlockedAction::Devtools),
            (KeyInput::new("J").ctrl().shift(), BlockedAction::Console),
            (KeyInput::new("C").ctrl().shift(), BlockedAction::Inspect),
            (KeyInput::new("S").ctrl().shift(), BlockedAction::Screenshot),
            (KeyInput::new("F12"), BlockedAction::Devtools),
        ];

        for (input, expected) in cases {
            assert_eq!(blocked(input.clone()), Some(expected), "{:?}", input);
        }
    }

    #[test]
    fn meta_counts_as_command_modifier() {
        assert_eq!(blocked(KeyInput::new("p").meta()), Some(BlockedAction::Print));
        assert_eq!(
            blocked(KeyInput::new("i").meta().shift()),
            Some(BlockedAction::Devtools)
        );
    }

    #[test]
    fn keys_compare_case_insensitively() {
        assert_eq!(blocked(KeyInput::new("P").ctrl()), Some(BlockedAction::Print));
        assert_eq!(blocked(KeyInput::new("f12")), Some(BlockedAction::Devtools));
    }

    #[test]
    fn shift_distinguishes_inspect_from_copy() {
        assert_eq!(blocked(KeyInput::new("c").ctrl()), Some(BlockedAction::Copy));
        assert_eq!(
            blocked(KeyInput::new("c").ctrl().shift()),
            Some(BlockedAction::Inspect)
        );
        assert_eq!(
            blocked(KeyInput::new("s").ctrl().shift()),
            Some(BlockedAction::Screenshot)
        );
    }

    #[test]
    fn unmatched_events_are_allowed() {
        for input in [
            KeyInput::new("p"),
            KeyInput::new("c"),
            KeyInput::new("i").ctrl(),
            KeyInput::new("p").ctrl().shift(),
            KeyInput::new("u").ctrl().shift(),
            KeyInput::new("ArrowDown").ctrl(),
            KeyInput::new("F11"),
            KeyInput::new("Enter"),
        ] {
            assert_eq!(classify(&input), Verdict::Allow, "{:?}", input);
        }
    }

    #[test]
    fn special_keys_stay_out_of_the_table() {
        let print_screen = KeyInput::new("PrintScreen");
        assert!(is_print_screen(&print_screen));
        assert_eq!(classify(&print_screen), Verdict::Allow);

        let meta = KeyInput::new("Meta").meta();
        assert!(is_platform_menu_key(&meta));
        assert_eq!(classify(&meta), Verdict::Allow);
        assert!(!is_platform_menu_key(&KeyInput::new("m")));
    }

    #[test]
    fn violation_message_uses_tag() {
        assert_eq!(BlockedAction::Print.violation_message(), "print is disabled");
        assert_eq!(BlockedAction::SelectAll.to_string(), "select-all");
    }
}
