//! Personality labels and the view goals they require.

use std::fmt;

/// Goal for `Lovely` when the in-game view bonus is in use.
pub const LOVELY_BONUS_GOAL: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Personality {
    Silent,
    Solitary,
    Reserved,
    Mischievous,
    Lousy,
    Friendly,
    Extroverted,
    Cute,
    Arrogant,
    Lovely,
}

impl Personality {
    pub const ALL: [Personality; 10] = [
        Personality::Silent,
        Personality::Solitary,
        Personality::Reserved,
        Personality::Mischievous,
        Personality::Lousy,
        Personality::Friendly,
        Personality::Extroverted,
        Personality::Cute,
        Personality::Arrogant,
        Personality::Lovely,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Personality::Silent => "Silent",
            Personality::Solitary => "Solitary",
            Personality::Reserved => "Reserved",
            Personality::Mischievous => "Mischievous",
            Personality::Lousy => "Lousy",
            Personality::Friendly => "Friendly",
            Personality::Extroverted => "Extroverted",
            Personality::Cute => "Cute",
            Personality::Arrogant => "Arrogant",
            Personality::Lovely => "Lovely",
        }
    }

    /// Total views the personality requires. Only `Lovely` depends on `bonus`.
    pub fn view_goal(&self, bonus: bool) -> i64 {
        match self {
            Personality::Silent => 0,
            Personality::Solitary => 1,
            Personality::Reserved => 5,
            Personality::Mischievous => 50,
            Personality::Lousy => 95,
            Personality::Friendly | Personality::Extroverted => 100,
            Personality::Cute => 199,
            Personality::Arrogant => 200,
            Personality::Lovely if bonus => LOVELY_BONUS_GOAL,
            Personality::Lovely => 300,
        }
    }

    /// Whether the goal changes with the in-game bonus.
    pub fn has_bonus_goal(&self) -> bool {
        matches!(self, Personality::Lovely)
    }

    /// Exact, case-insensitive lookup.
    pub fn from_name(name: &str) -> Option<Personality> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonalityMatch {
    Matched(Personality),
    Ambiguous(Vec<Personality>),
    NotFound,
}

/// Resolve user input to a personality.
///
/// Case-insensitive. An exact name wins; otherwise the input is treated as a
/// prefix and must pick out exactly one personality.
pub fn resolve(input: &str) -> PersonalityMatch {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return PersonalityMatch::NotFound;
    }
    if let Some(exact) = Personality::from_name(&needle) {
        return PersonalityMatch::Matched(exact);
    }

    let mut matches: Vec<Personality> = Personality::ALL
        .into_iter()
        .filter(|p| p.name().to_lowercase().starts_with(&needle))
        .collect();
    match matches.len() {
        0 => PersonalityMatch::NotFound,
        1 => PersonalityMatch::Matched(matches.remove(0)),
        _ => PersonalityMatch::Ambiguous(matches),
    }
}
