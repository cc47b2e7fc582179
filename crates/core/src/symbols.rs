//! Symbol table for the recognition unit dictionary
//!
//! The dictionary file holds one `<token> <id>` pair per line, with ids
//! dense from zero. Subword pieces prefixed with `▁` (U+2581) start a new
//! word; all other pieces are appended to the current word.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Word-start marker used by sentencepiece-style unit inventories
const WORD_START: char = '\u{2581}';

/// Symbol table errors
#[derive(Error, Debug)]
pub enum SymbolTableError {
    #[error("failed to read dictionary: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed dictionary line {line}: {content:?}")]
    Parse { line: usize, content: String },
}

/// Bidirectional token/id mapping
#[derive(Debug, Clone)]
pub struct SymbolTable {
    id_to_token: Vec<String>,
    token_to_id: HashMap<String, i32>,
}

impl SymbolTable {
    /// Load a dictionary from a `<token> <id>` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SymbolTableError> {
        let content = std::fs::read_to_string(path)?;
        let mut pairs = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (token, id) = match (parts.next(), parts.next()) {
                (Some(token), Some(id)) => {
                    let id = id.parse::<i32>().map_err(|_| SymbolTableError::Parse {
                        line: idx + 1,
                        content: line.to_string(),
                    })?;
                    (token.to_string(), id)
                }
                _ => {
                    return Err(SymbolTableError::Parse {
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            };
            pairs.push((token, id));
        }

        Ok(Self::from_pairs(pairs))
    }

    /// Build from an ordered token list (index is the id)
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let pairs = tokens
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i as i32))
            .collect();
        Self::from_pairs(pairs)
    }

    fn from_pairs(pairs: Vec<(String, i32)>) -> Self {
        let max_id = pairs.iter().map(|(_, id)| *id).max().unwrap_or(-1);
        let mut id_to_token = vec![String::new(); (max_id + 1) as usize];
        let mut token_to_id = HashMap::with_capacity(pairs.len());

        for (token, id) in pairs {
            id_to_token[id as usize] = token.clone();
            token_to_id.insert(token, id);
        }

        Self {
            id_to_token,
            token_to_id,
        }
    }

    /// Look up a token by id
    pub fn token(&self, id: i32) -> Option<&str> {
        self.id_to_token
            .get(id as usize)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Look up an id by token
    pub fn id(&self, token: &str) -> Option<i32> {
        self.token_to_id.get(token).copied()
    }

    /// Number of units
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Assemble a token id sequence into text
    pub fn decode(&self, tokens: &[i32]) -> String {
        let mut text = String::new();
        for &id in tokens {
            let Some(piece) = self.token(id) else {
                continue;
            };
            if let Some(rest) = piece.strip_prefix(WORD_START) {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(rest);
            } else {
                text.push_str(piece);
            }
        }
        text
    }

    /// Tokenize a context phrase into unit ids
    ///
    /// Each whitespace-separated word is matched greedily against the unit
    /// inventory, starting from the `▁`-prefixed word form. Returns `None`
    /// when some part of the phrase cannot be covered by the inventory.
    pub fn tokenize(&self, phrase: &str) -> Option<Vec<i32>> {
        let mut ids = Vec::new();
        for word in phrase.split_whitespace() {
            let marked = format!("{}{}", WORD_START, word);
            self.tokenize_word(&marked, &mut ids)?;
        }
        Some(ids)
    }

    fn tokenize_word(&self, word: &str, out: &mut Vec<i32>) -> Option<()> {
        let mut rest = word;
        while !rest.is_empty() {
            let mut matched = None;
            // Longest matching piece wins
            for (end, _) in rest.char_indices().rev() {
                let end = end + rest[end..].chars().next()?.len_utf8();
                if let Some(id) = self.id(&rest[..end]) {
                    matched = Some((id, end));
                    break;
                }
            }
            let (id, end) = matched?;
            out.push(id);
            rest = &rest[end..];
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::from_tokens(vec![
            "<blank>".to_string(),
            "▁he".to_string(),
            "llo".to_string(),
            "▁world".to_string(),
            "▁b".to_string(),
            "in".to_string(),
        ])
    }

    #[test]
    fn test_lookup() {
        let t = table();
        assert_eq!(t.token(3), Some("▁world"));
        assert_eq!(t.id("llo"), Some(2));
        assert_eq!(t.token(99), None);
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn test_decode_joins_pieces() {
        let t = table();
        assert_eq!(t.decode(&[1, 2, 3]), "hello world");
        assert_eq!(t.decode(&[]), "");
    }

    #[test]
    fn test_tokenize_greedy() {
        let t = table();
        assert_eq!(t.tokenize("world"), Some(vec![3]));
        assert_eq!(t.tokenize("hello world"), Some(vec![1, 2, 3]));
        assert_eq!(t.tokenize("unknownword"), None);
    }

    #[test]
    fn test_parse_errors() {
        let dir = std::env::temp_dir().join("asr-core-symbols-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("units.txt");
        std::fs::write(&path, "<blank> 0\nbroken-line\n").unwrap();
        let err = SymbolTable::from_file(&path).unwrap_err();
        assert!(matches!(err, SymbolTableError::Parse { line: 2, .. }));
    }
}
