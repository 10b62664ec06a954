//! The compact antenna-pair/polarization selection grammar.
//!
//! Tokens are comma separated (commas inside parenthesised groups bind to the
//! group) and are processed left to right:
//!
//! * `1` — every pair touching antenna 1, autocorrelation included
//! * `1_3` — the specific pair (1, 3)
//! * `(1,2)_3`, `1_(2,3)`, `(1,2)_(3,4)` — cross-products of pairs
//! * `1x`, `1x_2y` — polarization letters suffixed to an antenna number
//!   restrict the retained polarizations for pairs touching that antenna
//! * `xx`, `rr`, `pI`, ... (case-insensitive) — whole polarization classes
//! * `auto`, `cross`, `all` — autocorrelations, cross-correlations, everything
//! * a leading `-` negates a token, removing its matches from the
//!   accumulated result
//!
//! Parsing ([`parse_ant_str`]) and evaluation against a dataset
//! ([`eval_ant_str`]) are kept separate so the grammar can be unit tested on
//! its own.

use std::collections::HashSet;

use itertools::Itertools;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::{
    dataset::UVData,
    selection::SelectionError,
    types::POL_STR_TO_NUM,
};

lazy_static! {
    static ref RE_ITEM: Regex = Regex::new(r"^(\d+)([xylr]*)$").expect("valid regex");
}

/// One side of a pair token: antenna numbers, each with optional
/// polarization-letter suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntSide {
    /// The antenna numbers named on this side.
    pub ants: Vec<usize>,
    /// Lower-case polarization letters suffixed on this side, deduplicated.
    pub letters: Vec<char>,
}

/// A single parsed token of the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntToken {
    /// Every baseline.
    All,
    /// Autocorrelations only.
    Auto,
    /// Cross-correlations only.
    Cross,
    /// A whole polarization class, by AIPS code.
    Pol(i32),
    /// Antenna pairs: `right` of `None` means "every pair touching a left
    /// antenna", otherwise the cross-product of the two sides.
    Pairs {
        /// The left side of the `_`.
        left: AntSide,
        /// The right side of the `_`, when present.
        right: Option<AntSide>,
    },
}

/// A token together with its negation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    /// True when the token had a leading `-`.
    pub negated: bool,
    /// The token itself.
    pub token: AntToken,
}

/// Split on commas that sit outside parentheses.
fn split_tokens(ant_str: &str) -> Result<Vec<String>, SelectionError> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in ant_str.chars() {
        match c {
            '(' => {
                depth += 1;
                cur.push(c);
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| SelectionError::BadAntStr {
                    ant_str: ant_str.to_string(),
                    reason: "unbalanced parentheses".to_string(),
                })?;
                cur.push(c);
            }
            ',' if depth == 0 => {
                out.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if depth != 0 {
        return Err(SelectionError::BadAntStr {
            ant_str: ant_str.to_string(),
            reason: "unbalanced parentheses".to_string(),
        });
    }
    out.push(cur.trim().to_string());
    out.retain(|t| !t.is_empty());
    Ok(out)
}

fn parse_side(side: &str, ant_str: &str) -> Result<AntSide, SelectionError> {
    let items: Vec<&str> = if side.starts_with('(') && side.ends_with(')') {
        side[1..side.len() - 1].split(',').map(str::trim).collect()
    } else {
        vec![side]
    };
    let mut ants = Vec::new();
    let mut letters = Vec::new();
    for item in items {
        let caps = RE_ITEM
            .captures(item)
            .ok_or_else(|| SelectionError::BadAntStr {
                ant_str: ant_str.to_string(),
                reason: format!("unparseable antenna item {:?}", item),
            })?;
        let num: usize = caps[1].parse().map_err(|_| SelectionError::BadAntStr {
            ant_str: ant_str.to_string(),
            reason: format!("antenna number out of range in {:?}", item),
        })?;
        ants.push(num);
        letters.extend(caps[2].chars());
    }
    letters = letters.into_iter().unique().collect();
    Ok(AntSide { ants, letters })
}

/// Parse a selection string into its token list.
///
/// # Errors
///
/// Returns [`SelectionError::BadAntStr`] for malformed tokens, unbalanced
/// parentheses or unknown polarization names.
pub fn parse_ant_str(ant_str: &str) -> Result<Vec<ParsedToken>, SelectionError> {
    let mut tokens = Vec::new();
    for raw in split_tokens(ant_str)? {
        let (negated, body) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest.trim().to_string()),
            None => (false, raw),
        };
        let upper = body.to_uppercase();
        let token = match upper.as_str() {
            "ALL" => AntToken::All,
            "AUTO" => AntToken::Auto,
            "CROSS" => AntToken::Cross,
            _ if POL_STR_TO_NUM.contains_key(upper.as_str())
                && body.chars().any(|c| !c.is_ascii_digit()) =>
            {
                AntToken::Pol(POL_STR_TO_NUM[upper.as_str()])
            }
            _ => match body.split_once('_') {
                Some((l, r)) => AntToken::Pairs {
                    left: parse_side(l.trim(), ant_str)?,
                    right: Some(parse_side(r.trim(), ant_str)?),
                },
                None => AntToken::Pairs {
                    left: parse_side(body.trim(), ant_str)?,
                    right: None,
                },
            },
        };
        tokens.push(ParsedToken { negated, token });
    }
    Ok(tokens)
}

/// The evaluated result of a selection string against one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AntStrSelection {
    /// Retained antenna-number pairs; `None` when no pair token restricted
    /// the rows. A pair matches a row in either antenna order.
    pub pairs: Option<Vec<(usize, usize)>>,
    /// Retained polarization codes; `None` when unrestricted.
    pub pols: Option<Vec<i32>>,
}

/// The polarization codes implied by suffix letters on the two sides of a
/// pair token. A side without letters is a wildcard over the partner's
/// polarization basis.
fn suffix_pols(left: &[char], right: &[char]) -> Vec<i32> {
    let basis = |letters: &[char]| -> Vec<char> {
        if letters.is_empty() {
            vec![]
        } else {
            letters.to_vec()
        }
    };
    let wildcard_for = |partner: &[char]| -> Vec<char> {
        match partner.first() {
            Some('l') | Some('r') => vec!['l', 'r'],
            _ => vec!['x', 'y'],
        }
    };
    let l = if left.is_empty() {
        wildcard_for(right)
    } else {
        basis(left)
    };
    let r = if right.is_empty() {
        wildcard_for(left)
    } else {
        basis(right)
    };
    let mut pols = Vec::new();
    for &a in &l {
        for &b in &r {
            let name: String = [a, b].iter().collect::<String>().to_uppercase();
            if let Some(&code) = POL_STR_TO_NUM.get(name.as_str()) {
                pols.push(code);
            }
        }
    }
    pols.into_iter().unique().collect()
}

/// Evaluate parsed tokens against a dataset's antenna pairs and
/// polarizations.
///
/// In strict mode a negation with nothing accumulated yet, or a reference to
/// an antenna number or polarization absent from the dataset, is an error;
/// otherwise these degrade to warnings.
///
/// # Errors
///
/// See [`SelectionError`].
pub fn eval_ant_str(
    tokens: &[ParsedToken],
    uvd: &UVData,
    strict: bool,
) -> Result<AntStrSelection, SelectionError> {
    // the universe of (antenna-number, antenna-number) pairs with data
    let dataset_pairs: Vec<(usize, usize)> = uvd
        .ant_1_array
        .iter()
        .zip(uvd.ant_2_array.iter())
        .map(|(&a1, &a2)| (uvd.antenna_numbers[a1], uvd.antenna_numbers[a2]))
        .unique()
        .collect();
    let dataset_ants: HashSet<usize> = dataset_pairs
        .iter()
        .flat_map(|&(a, b)| [a, b])
        .collect();

    let norm = |a: usize, b: usize| if a <= b { (a, b) } else { (b, a) };
    let mut acc: Vec<(usize, usize)> = Vec::new();
    let mut any_pair_token = false;
    let mut pol_include: Vec<i32> = Vec::new();
    let mut pol_exclude: Vec<i32> = Vec::new();

    for parsed in tokens {
        let matched: Option<Vec<(usize, usize)>> = match &parsed.token {
            AntToken::All => Some(dataset_pairs.clone()),
            AntToken::Auto => Some(
                dataset_pairs
                    .iter()
                    .copied()
                    .filter(|&(a, b)| a == b)
                    .collect(),
            ),
            AntToken::Cross => Some(
                dataset_pairs
                    .iter()
                    .copied()
                    .filter(|&(a, b)| a != b)
                    .collect(),
            ),
            AntToken::Pol(code) => {
                if !uvd.polarization_array.contains(code) {
                    if strict {
                        return Err(SelectionError::ValueNotFound {
                            axis: "polarization".to_string(),
                            value: code.to_string(),
                        });
                    }
                    warn!("polarization {} not present, ignoring", code);
                } else if parsed.negated {
                    pol_exclude.push(*code);
                } else {
                    pol_include.push(*code);
                }
                None
            }
            AntToken::Pairs { left, right } => {
                for &ant in left.ants.iter().chain(
                    right.iter().flat_map(|s| s.ants.iter()),
                ) {
                    if !dataset_ants.contains(&ant) {
                        if strict {
                            return Err(SelectionError::ValueNotFound {
                                axis: "antenna".to_string(),
                                value: ant.to_string(),
                            });
                        }
                        warn!("antenna {} has no data, ignoring", ant);
                    }
                }
                let matched: Vec<(usize, usize)> = match right {
                    None => dataset_pairs
                        .iter()
                        .copied()
                        .filter(|&(a, b)| left.ants.contains(&a) || left.ants.contains(&b))
                        .collect(),
                    Some(right_side) => {
                        let wanted: HashSet<(usize, usize)> = left
                            .ants
                            .iter()
                            .cartesian_product(right_side.ants.iter())
                            .map(|(&a, &b)| norm(a, b))
                            .collect();
                        dataset_pairs
                            .iter()
                            .copied()
                            .filter(|&(a, b)| wanted.contains(&norm(a, b)))
                            .collect()
                    }
                };
                let right_letters: &[char] =
                    right.as_ref().map_or(&[], |s| s.letters.as_slice());
                if !left.letters.is_empty() || !right_letters.is_empty() {
                    // a bare suffixed antenna can sit on either side of a row
                    let pols: Vec<i32> = if right.is_none() {
                        suffix_pols(&left.letters, &[])
                            .into_iter()
                            .chain(suffix_pols(&[], &left.letters))
                            .unique()
                            .collect()
                    } else {
                        suffix_pols(&left.letters, right_letters)
                    };
                    if parsed.negated {
                        pol_exclude.extend(pols);
                    } else {
                        pol_include.extend(pols);
                    }
                }
                Some(matched)
            }
        };

        if let Some(matched) = matched {
            any_pair_token = true;
            if parsed.negated {
                if acc.is_empty() {
                    if strict {
                        return Err(SelectionError::NegationFirst {
                            token: format!("{:?}", parsed.token),
                        });
                    }
                    warn!("negated token with nothing to subtract from, ignoring");
                    continue;
                }
                let remove: HashSet<(usize, usize)> =
                    matched.iter().map(|&(a, b)| norm(a, b)).collect();
                acc.retain(|&(a, b)| !remove.contains(&norm(a, b)));
            } else {
                for pair in matched {
                    if !acc.iter().any(|&(a, b)| norm(a, b) == norm(pair.0, pair.1)) {
                        acc.push(pair);
                    }
                }
            }
        }
    }

    let pairs = if any_pair_token { Some(acc) } else { None };
    let pol_include: Vec<i32> = pol_include.into_iter().unique().collect();
    let pols = if pol_include.is_empty() && pol_exclude.is_empty() {
        None
    } else if pol_include.is_empty() {
        Some(
            uvd.polarization_array
                .iter()
                .copied()
                .filter(|p| !pol_exclude.contains(p))
                .collect(),
        )
    } else {
        Some(
            pol_include
                .into_iter()
                .filter(|p| !pol_exclude.contains(p))
                .collect(),
        )
    };

    Ok(AntStrSelection { pairs, pols })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::synthetic_uvdata;

    #[test]
    fn test_parse_bare_and_pair() {
        let tokens = parse_ant_str("1,2_3").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens[0].token,
            AntToken::Pairs {
                left: AntSide {
                    ants: vec![1],
                    letters: vec![]
                },
                right: None
            }
        );
        assert_eq!(
            tokens[1].token,
            AntToken::Pairs {
                left: AntSide {
                    ants: vec![2],
                    letters: vec![]
                },
                right: Some(AntSide {
                    ants: vec![3],
                    letters: vec![]
                })
            }
        );
    }

    #[test]
    fn test_parse_groups_and_negation() {
        let tokens = parse_ant_str("(1,2)_(3,4),-1_3").unwrap();
        assert!(!tokens[0].negated);
        assert!(tokens[1].negated);
        match &tokens[0].token {
            AntToken::Pairs {
                left,
                right: Some(right),
            } => {
                assert_eq!(left.ants, vec![1, 2]);
                assert_eq!(right.ants, vec![3, 4]);
            }
            other => panic!("unexpected token {:?}", other),
        }
    }

    #[test]
    fn test_parse_pol_keywords_and_suffixes() {
        let tokens = parse_ant_str("XX,pi,auto,1x_2y").unwrap();
        assert_eq!(tokens[0].token, AntToken::Pol(-5));
        assert_eq!(tokens[1].token, AntToken::Pol(1));
        assert_eq!(tokens[2].token, AntToken::Auto);
        match &tokens[3].token {
            AntToken::Pairs {
                left,
                right: Some(right),
            } => {
                assert_eq!((left.ants.clone(), left.letters.clone()), (vec![1], vec!['x']));
                assert_eq!(right.letters, vec!['y']);
            }
            other => panic!("unexpected token {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_ant_str("(1,2_3").is_err());
        assert!(parse_ant_str("1_2_3").is_err());
        assert!(parse_ant_str("frog").is_err());
    }

    #[test]
    fn test_suffix_pols() {
        assert_eq!(suffix_pols(&['x'], &['y']), vec![-7]);
        let mut both = suffix_pols(&['x'], &[]);
        both.sort_unstable();
        assert_eq!(both, vec![-7, -5]);
        assert_eq!(suffix_pols(&['r'], &['r']), vec![-1]);
    }

    #[test]
    fn test_eval_bare_antenna() {
        let uvd = synthetic_uvdata();
        let tokens = parse_ant_str("1").unwrap();
        let sel = eval_ant_str(&tokens, &uvd, true).unwrap();
        let pairs = sel.pairs.unwrap();
        assert!(pairs.iter().all(|&(a, b)| a == 1 || b == 1));
        assert!(pairs.contains(&(1, 1)));
        assert!(sel.pols.is_none());
    }

    #[test]
    fn test_eval_negation_grammar() {
        // all pairs touching 1 except (1, 3)
        let uvd = synthetic_uvdata();
        let tokens = parse_ant_str("1,-1_3").unwrap();
        let sel = eval_ant_str(&tokens, &uvd, true).unwrap();
        let pairs = sel.pairs.unwrap();
        assert!(!pairs.contains(&(1, 3)));
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(1, 2)));
        assert!(pairs.contains(&(1, 1)));
    }

    #[test]
    fn test_eval_negation_first_is_error_in_strict() {
        let uvd = synthetic_uvdata();
        let tokens = parse_ant_str("-1_3").unwrap();
        assert!(matches!(
            eval_ant_str(&tokens, &uvd, true),
            Err(SelectionError::NegationFirst { .. })
        ));
        // non-strict: a no-op
        let sel = eval_ant_str(&tokens, &uvd, false).unwrap();
        assert_eq!(sel.pairs.unwrap(), vec![]);
    }

    #[test]
    fn test_eval_missing_antenna() {
        let uvd = synthetic_uvdata();
        let tokens = parse_ant_str("99").unwrap();
        assert!(matches!(
            eval_ant_str(&tokens, &uvd, true),
            Err(SelectionError::ValueNotFound { .. })
        ));
    }

    #[test]
    fn test_eval_pol_keyword() {
        let uvd = synthetic_uvdata();
        let tokens = parse_ant_str("xx,yy").unwrap();
        let sel = eval_ant_str(&tokens, &uvd, true).unwrap();
        assert!(sel.pairs.is_none());
        assert_eq!(sel.pols.unwrap(), vec![-5, -6]);
    }
}
