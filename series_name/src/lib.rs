//! Series-name parsing and normalisation.
//!
//! A raw series name is a metric name followed by one or more `tag=value`
//! pairs separated by whitespace. Equality of series is defined over the
//! *canonical* form produced by [`normalize`]: whitespace runs collapse to a
//! single space and tags are sorted by key, so `"cpu host=a region=eu"` and
//! `"cpu  region=eu host=a"` identify the same series.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::MAX_SERIES_NAME_LEN;
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace1},
    multi::many1,
    sequence::{preceded, separated_pair},
    IResult,
};
use snafu::{ensure, Snafu};

/// Series-name parse error.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("series name is empty"))]
    Empty,

    #[snafu(display("series name {name:?} has no tags"))]
    NoTags { name: String },

    #[snafu(display("malformed series name near {fragment:?}"))]
    Malformed { fragment: String },

    #[snafu(display("duplicate tag key {key:?}"))]
    DuplicateTag { key: String },

    #[snafu(display(
        "canonical series name is {len} bytes, the limit is {MAX_SERIES_NAME_LEN}"
    ))]
    TooLong { len: usize },
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

fn bare_word(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '=')(i)
}

fn tag_value(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(i)
}

fn tag_pair(i: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(bare_word, char('='), tag_value)(i)
}

/// Produce the canonical form of `raw`.
///
/// Canonicalisation is idempotent; feeding a canonical name back in returns
/// it unchanged.
pub fn normalize(raw: &str) -> Result<String> {
    let input = raw.trim();
    ensure!(!input.is_empty(), EmptySnafu);

    let (rest, metric) = bare_word(input).map_err(|_: nom::Err<nom::error::Error<&str>>| {
        MalformedSnafu { fragment: input }.build()
    })?;

    let (rest, mut tags) = many1(preceded(multispace1, tag_pair))(rest).map_err(
        |_: nom::Err<nom::error::Error<&str>>| {
            if rest.trim().is_empty() {
                NoTagsSnafu { name: input }.build()
            } else {
                MalformedSnafu {
                    fragment: rest.trim(),
                }
                .build()
            }
        },
    )?;
    ensure!(
        rest.trim().is_empty(),
        MalformedSnafu {
            fragment: rest.trim()
        }
    );

    tags.sort_unstable_by(|a, b| a.0.cmp(b.0));
    for w in tags.windows(2) {
        ensure!(w[0].0 != w[1].0, DuplicateTagSnafu { key: w[0].0 });
    }

    let mut out = String::with_capacity(input.len());
    out.push_str(metric);
    for (key, value) in &tags {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    ensure!(
        out.len() <= MAX_SERIES_NAME_LEN,
        TooLongSnafu { len: out.len() }
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn already_canonical_names_pass_through() {
        assert_eq!(normalize("cpu host=a").unwrap(), "cpu host=a");
        assert_eq!(
            normalize("mem host=a region=eu").unwrap(),
            "mem host=a region=eu"
        );
    }

    #[test]
    fn tags_are_sorted_and_whitespace_collapsed() {
        assert_eq!(
            normalize("  cpu\t region=eu   host=a ").unwrap(),
            "cpu host=a region=eu"
        );
    }

    #[test]
    fn value_may_contain_equals() {
        assert_eq!(normalize("m k=a=b").unwrap(), "m k=a=b");
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_matches!(normalize(""), Err(Error::Empty));
        assert_matches!(normalize("   \t "), Err(Error::Empty));
    }

    #[test]
    fn missing_tags_are_rejected() {
        assert_matches!(normalize("cpu"), Err(Error::NoTags { .. }));
        assert_matches!(normalize("cpu  "), Err(Error::NoTags { .. }));
    }

    #[test]
    fn malformed_tags_are_rejected() {
        assert_matches!(normalize("cpu host"), Err(Error::Malformed { .. }));
        assert_matches!(normalize("cpu host="), Err(Error::Malformed { .. }));
        assert_matches!(normalize("cpu =a"), Err(Error::Malformed { .. }));
        assert_matches!(normalize("cpu host=a junk"), Err(Error::Malformed { .. }));
    }

    #[test]
    fn duplicate_tag_keys_are_rejected() {
        assert_matches!(
            normalize("cpu host=a host=b"),
            Err(Error::DuplicateTag { .. })
        );
    }

    #[test]
    fn overlong_names_are_rejected() {
        let value = "v".repeat(MAX_SERIES_NAME_LEN);
        let raw = format!("cpu host={value}");
        assert_matches!(normalize(&raw), Err(Error::TooLong { .. }));
    }

    proptest! {
        #[test]
        fn normalisation_is_idempotent(
            metric in "[a-z]{1,8}",
            tags in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 1..5),
        ) {
            // Present the tags in reverse order with ragged spacing; the
            // canonical form must come out sorted and single-spaced.
            let mut raw = metric.clone();
            for (k, v) in tags.iter().rev() {
                raw.push_str("  ");
                raw.push_str(k);
                raw.push('=');
                raw.push_str(v);
            }

            let canonical = normalize(&raw).unwrap();
            prop_assert_eq!(normalize(&canonical).unwrap(), canonical.clone());

            let mut expected = metric;
            for (k, v) in &tags {
                expected.push(' ');
                expected.push_str(k);
                expected.push('=');
                expected.push_str(v);
            }
            prop_assert_eq!(canonical, expected);
        }
    }
}
