//! Morse dictionary
//!
//! Static bidirectional mapping between characters and their Dot/Dash
//! representations, with constant-time lookup in both directions.
//!
//! Features:
//! - Compiled-in character table: letters, digits, punctuation, selected
//!   ISO 8859-1/2 code points and six non-standard procedural signs
//! - Representation-hash reverse lookup (leading-1 sentinel, values 2..=255)
//! - Procedural signal expansions ('+' -> "AR", '<' -> "VA", ...)
//! - Phonetic alphabet ("Alfa" .. "Zulu")

use lazy_static::lazy_static;
use phf::phf_map;

use crate::{CwError, Result};

/// Length of the longest representation in the dictionary, in symbols.
pub const REPRESENTATION_MAX: usize = 7;

/// The compiled-in character table.
///
/// Keys are uppercase; lookups fold case first. The six characters
/// `<`, `>`, `!`, `&`, `^` and `~` stand in for the non-standard
/// procedural signs VA, BK, SN, AS, KA and AL.
static CHAR_TO_REPRESENTATION: phf::Map<char, &'static str> = phf_map! {
    // ASCII letters
    'A' => ".-",    'B' => "-...",  'C' => "-.-.",  'D' => "-..",
    'E' => ".",     'F' => "..-.",  'G' => "--.",   'H' => "....",
    'I' => "..",    'J' => ".---",  'K' => "-.-",   'L' => ".-..",
    'M' => "--",    'N' => "-.",    'O' => "---",   'P' => ".--.",
    'Q' => "--.-",  'R' => ".-.",   'S' => "...",   'T' => "-",
    'U' => "..-",   'V' => "...-",  'W' => ".--",   'X' => "-..-",
    'Y' => "-.--",  'Z' => "--..",
    // Numerals
    '0' => "-----", '1' => ".----", '2' => "..---", '3' => "...--",
    '4' => "....-", '5' => ".....", '6' => "-....", '7' => "--...",
    '8' => "---..", '9' => "----.",
    // Punctuation
    '"' => ".-..-.",  '\'' => ".----.", '$' => "...-..-", '(' => "-.--.",
    ')' => "-.--.-",  '+' => ".-.-.",   ',' => "--..--",  '-' => "-....-",
    '.' => ".-.-.-",  '/' => "-..-.",   ':' => "---...",  ';' => "-.-.-.",
    '=' => "-...-",   '?' => "..--..",  '_' => "..--.-",  '@' => ".--.-.",
    // ISO 8859-1 accented characters
    'Ü' => "..--",  'Ä' => ".-.-",  'Ç' => "-.-..", 'Ö' => "---.",
    'É' => "..-..", 'È' => ".-..-", 'À' => ".--.-", 'Ñ' => "--.--",
    // ISO 8859-2 accented characters
    'Ş' => "----",  'Ż' => "--..-",
    // Non-standard procedural signs
    '<' => "...-.-",  '>' => "-...-.-", '!' => "...-.",
    '&' => ".-...",   '^' => "-.-.-",   '~' => ".-.-..",
};

/// Procedural signal expansions. The flag records whether the sign is
/// usually written expanded ("VA") rather than as its character ('<').
static PROCEDURAL_EXPANSIONS: phf::Map<char, (&'static str, bool)> = phf_map! {
    '"' => ("AF", false), '\'' => ("WG", false), '$' => ("SX", false),
    '(' => ("KN", false), ')' => ("KK", false),  '+' => ("AR", false),
    ',' => ("MIM", false), '-' => ("DU", false), '.' => ("AAA", false),
    '/' => ("DN", false), ':' => ("OS", false),  ';' => ("KR", false),
    '=' => ("BT", false), '?' => ("IMI", false), '_' => ("IQ", false),
    '@' => ("AC", false),
    '<' => ("VA", true),  '>' => ("BK", true),   '!' => ("SN", true),
    '&' => ("AS", true),  '^' => ("KA", true),   '~' => ("AL", true),
};

/// NATO phonetic alphabet, indexed by letter offset from 'A'.
static PHONETICS: [&str; 26] = [
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf",
    "Hotel", "India", "Juliett", "Kilo", "Lima", "Mike", "November",
    "Oscar", "Papa", "Quebec", "Romeo", "Sierra", "Tango", "Uniform",
    "Victor", "Whiskey", "X-ray", "Yankee", "Zulu",
];

lazy_static! {
    /// Hash-indexed reverse lookup, built once from the forward table.
    static ref HASH_TO_CHARACTER: [Option<char>; 256] = {
        let mut table = [None; 256];
        for (ch, representation) in CHAR_TO_REPRESENTATION.entries() {
            let hash = representation_to_hash(representation)
                .expect("dictionary entry with unhashable representation");
            table[hash as usize] = Some(*ch);
        }
        table
    };
}

/// Fold a character to the table's canonical (uppercase) form.
fn fold(character: char) -> char {
    character.to_uppercase().next().unwrap_or(character)
}

/// Hash a representation into the 2..=255 range.
///
/// The hash is built bit by bit (Dot = 0, Dash = 1) over a leading-1
/// sentinel, so `"."` (2) and `".."` (4) stay distinct. Returns `None`
/// for an empty, over-long or malformed representation.
pub fn representation_to_hash(representation: &str) -> Option<u8> {
    if representation.is_empty() || representation.len() > REPRESENTATION_MAX {
        return None;
    }
    let mut hash: u32 = 1;
    for symbol in representation.bytes() {
        hash <<= 1;
        match symbol {
            b'-' => hash |= 1,
            b'.' => {}
            _ => return None,
        }
    }
    Some(hash as u8)
}

/// Look up the representation of a character.
///
/// Input is case-folded first. Returns [`CwError::NotFound`] for a
/// character outside the table.
pub fn character_to_representation(character: char) -> Result<&'static str> {
    CHAR_TO_REPRESENTATION
        .get(&fold(character))
        .copied()
        .ok_or(CwError::NotFound)
}

/// Look up the character a representation stands for.
///
/// Returns [`CwError::Invalid`] for a malformed representation and
/// [`CwError::NotFound`] for a well-formed one with no table entry.
pub fn representation_to_character(representation: &str) -> Result<char> {
    if !representation_is_valid(representation) {
        return Err(CwError::Invalid("representation"));
    }
    representation_to_hash(representation)
        .and_then(|hash| HASH_TO_CHARACTER[hash as usize])
        .ok_or(CwError::NotFound)
}

/// Check that a representation consists only of `.` and `-` and is no
/// longer than [`REPRESENTATION_MAX`].
pub fn representation_is_valid(representation: &str) -> bool {
    !representation.is_empty()
        && representation.len() <= REPRESENTATION_MAX
        && representation.bytes().all(|b| b == b'.' || b == b'-')
}

/// Check that a character can be sent: a table member or the space.
pub fn character_is_valid(character: char) -> bool {
    character == ' ' || CHAR_TO_REPRESENTATION.contains_key(&fold(character))
}

/// Look up the procedural-signal expansion of a character, together
/// with its "is usually expanded" flag.
pub fn procedural_expansion(character: char) -> Result<(&'static str, bool)> {
    PROCEDURAL_EXPANSIONS
        .get(&fold(character))
        .copied()
        .ok_or(CwError::NotFound)
}

/// Length of the longest procedural expansion, in characters.
pub fn procedural_expansion_max() -> usize {
    PROCEDURAL_EXPANSIONS
        .values()
        .map(|(expansion, _)| expansion.len())
        .max()
        .unwrap_or(0)
}

/// Look up the phonetic of a letter ('A' -> "Alfa").
pub fn character_to_phonetic(character: char) -> Result<&'static str> {
    let folded = fold(character);
    if folded.is_ascii_uppercase() {
        Ok(PHONETICS[(folded as u8 - b'A') as usize])
    } else {
        Err(CwError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_lookups() {
        assert_eq!(character_to_representation('A').unwrap(), ".-");
        assert_eq!(character_to_representation('Z').unwrap(), "--..");
        assert_eq!(character_to_representation('?').unwrap(), "..--..");
        assert_eq!(representation_to_character("...-.").unwrap(), '!');
    }

    #[test]
    fn test_case_folding() {
        assert_eq!(
            character_to_representation('q').unwrap(),
            character_to_representation('Q').unwrap()
        );
        assert_eq!(character_to_representation('ü').unwrap(), "..--");
    }

    #[test]
    fn test_round_trip_whole_table() {
        for (ch, representation) in CHAR_TO_REPRESENTATION.entries() {
            assert_eq!(
                representation_to_character(representation).unwrap(),
                *ch,
                "round trip failed for {ch:?}"
            );
        }
    }

    #[test]
    fn test_hash_range() {
        for representation in CHAR_TO_REPRESENTATION.values() {
            let hash = representation_to_hash(representation).unwrap();
            assert!((2..=255).contains(&hash), "hash out of range for {representation}");
        }
    }

    #[test]
    fn test_hash_distinguishes_prefixes() {
        assert_ne!(
            representation_to_hash(".").unwrap(),
            representation_to_hash("..").unwrap()
        );
        assert_ne!(
            representation_to_hash("-").unwrap(),
            representation_to_hash("--").unwrap()
        );
    }

    #[test]
    fn test_representation_validation() {
        assert!(representation_is_valid(".-"));
        assert!(representation_is_valid("-------"));
        assert!(!representation_is_valid(""));
        assert!(!representation_is_valid(".-x"));
        assert!(!representation_is_valid("--------"));
    }

    #[test]
    fn test_character_validation() {
        assert!(character_is_valid('a'));
        assert!(character_is_valid(' '));
        assert!(!character_is_valid('%'));
        assert!(!character_is_valid('\n'));
    }

    #[test]
    fn test_unknown_representation() {
        // Well-formed but absent from the table.
        assert_eq!(
            representation_to_character("-------"),
            Err(CwError::NotFound)
        );
        assert_eq!(
            representation_to_character("ab"),
            Err(CwError::Invalid("representation"))
        );
    }

    #[test]
    fn test_procedural_expansions() {
        assert_eq!(procedural_expansion('+').unwrap(), ("AR", false));
        assert_eq!(procedural_expansion('<').unwrap(), ("VA", true));
        assert_eq!(procedural_expansion('A'), Err(CwError::NotFound));
        assert!(procedural_expansion_max() >= 3);
    }

    #[test]
    fn test_phonetics() {
        assert_eq!(character_to_phonetic('a').unwrap(), "Alfa");
        assert_eq!(character_to_phonetic('Z').unwrap(), "Zulu");
        assert_eq!(character_to_phonetic('3'), Err(CwError::NotFound));
    }

    #[test]
    fn test_longest_representation() {
        let longest = CHAR_TO_REPRESENTATION
            .values()
            .map(|r| r.len())
            .max()
            .unwrap();
        assert_eq!(longest, REPRESENTATION_MAX);
    }
}
