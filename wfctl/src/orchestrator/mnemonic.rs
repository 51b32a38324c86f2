use rand::{seq::SliceRandom, Rng};

const ADJECTIVES: &str = include_str!("words/adjectives.txt");
const NOUNS: &str = include_str!("words/nouns.txt");

/// Suffix characters. Look-alikes (0/O, 1/l/I) and vowels are left out so ids read back unambiguously and never
/// spell words.
pub const SUFFIX_ALPHABET: &str = "23456789BCDFGHJKLMNPQRSTVWXYZbcdfghjkmnpqrstvwxyz";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MnemonicError {
    #[error("no {category} between {min} and {max} letters long is available")]
    NoWords {
        category: &'static str,
        min: usize,
        max: usize,
    },

    #[error("suffix alphabet must not be empty")]
    EmptyAlphabet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnemonicOptions {
    pub word_min_length: usize,
    pub word_max_length: usize,
    pub suffix_length: usize,
    pub suffix_alphabet: String,
}

impl Default for MnemonicOptions {
    fn default() -> Self {
        MnemonicOptions {
            word_min_length: 3,
            word_max_length: 8,
            suffix_length: 7,
            suffix_alphabet: SUFFIX_ALPHABET.into(),
        }
    }
}

fn words_between(list: &'static str, min: usize, max: usize) -> Vec<&'static str> {
    list.lines()
        .map(str::trim)
        .filter(|word| (min..=max).contains(&word.len()))
        .filter(|word| word.chars().all(|c| c.is_ascii_alphabetic()))
        .collect()
}

fn pick_word<R: Rng>(
    rng: &mut R,
    category: &'static str,
    list: &'static str,
    options: &MnemonicOptions,
) -> Result<&'static str, MnemonicError> {
    words_between(list, options.word_min_length, options.word_max_length)
        .choose(rng)
        .copied()
        .ok_or(MnemonicError::NoWords {
            category,
            min: options.word_min_length,
            max: options.word_max_length,
        })
}

/// Generates a human memorable run identifier, e.g. `brave_otter_x7K2mQp`, with the default options.
pub fn mnemonic_hash() -> Result<String, MnemonicError> {
    mnemonic_hash_with(&MnemonicOptions::default())
}

/// Generates `{adjective}_{noun}_{suffix}`, the suffix being drawn at random from the restricted alphabet.
pub fn mnemonic_hash_with(options: &MnemonicOptions) -> Result<String, MnemonicError> {
    let alphabet: Vec<char> = options.suffix_alphabet.chars().collect();
    if alphabet.is_empty() {
        return Err(MnemonicError::EmptyAlphabet);
    }

    let mut rng = rand::thread_rng();

    let adjective = pick_word(&mut rng, "adjective", ADJECTIVES, options)?;
    let noun = pick_word(&mut rng, "noun", NOUNS, options)?;

    let suffix: String = (0..options.suffix_length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect();

    Ok(format!("{adjective}_{noun}_{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use regex::Regex;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_well_formed() {
        let pattern = Regex::new(r"^[a-z]+_[a-z]+_[A-Za-z0-9]{7}$").unwrap();

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = mnemonic_hash().unwrap();
            assert!(pattern.is_match(&id), "malformed id {id}");

            let suffix = id.rsplit('_').next().unwrap();
            assert!(suffix.chars().all(|c| SUFFIX_ALPHABET.contains(c)));

            assert!(seen.insert(id.clone()), "duplicate id {id}");
        }
    }

    #[test]
    fn word_length_bounds_are_respected() {
        let options = MnemonicOptions {
            word_min_length: 4,
            word_max_length: 5,
            ..Default::default()
        };

        for _ in 0..200 {
            let id = mnemonic_hash_with(&options).unwrap();
            let words: Vec<_> = id.split('_').collect();
            assert_eq!(words.len(), 3);
            assert!((4..=5).contains(&words[0].len()), "{id}");
            assert!((4..=5).contains(&words[1].len()), "{id}");
        }
    }

    #[test]
    fn impossible_options_are_rejected() {
        let options = MnemonicOptions {
            word_min_length: 20,
            word_max_length: 30,
            ..Default::default()
        };
        assert_eq!(
            mnemonic_hash_with(&options).unwrap_err(),
            MnemonicError::NoWords {
                category: "adjective",
                min: 20,
                max: 30
            }
        );

        let options = MnemonicOptions {
            suffix_alphabet: "".into(),
            ..Default::default()
        };
        assert_eq!(
            mnemonic_hash_with(&options).unwrap_err(),
            MnemonicError::EmptyAlphabet
        );
    }
}
