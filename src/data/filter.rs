use std::collections::BTreeMap;

use log::warn;

use super::model::{ExposureProduct, ExposureRef};
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Member grouping: which exposures of a product play which role
// ---------------------------------------------------------------------------

/// Members of one product keyed by lower-cased exposure type, each list in
/// member order.
pub type MembersByType<'a> = BTreeMap<String, Vec<&'a ExposureRef>>;

pub fn members_by_type(product: &ExposureProduct) -> MembersByType<'_> {
    let mut groups: MembersByType<'_> = BTreeMap::new();
    for member in &product.members {
        groups
            .entry(member.exptype.to_lowercase())
            .or_default()
            .push(&member.exposure);
    }
    groups
}

/// Members of the given (lower-case) type; empty when there are none.
pub fn members_of<'a>(groups: &MembersByType<'a>, exptype: &str) -> Vec<&'a ExposureRef> {
    groups.get(exptype).cloned().unwrap_or_default()
}

/// Pick the science exposure of a product.
///
/// Exactly one is expected. With several, a warning is logged and the first
/// in member order wins. With none there is nothing to process.
pub fn select_science<'a>(product: &ExposureProduct, groups: &MembersByType<'a>) -> Result<&'a ExposureRef> {
    let science = members_of(groups, "science");
    if science.len() != 1 {
        warn!(
            "Wrong number of science files found in {} ({})",
            product.name,
            science.len()
        );
        warn!("    Using only first one.");
    }
    science
        .first()
        .copied()
        .ok_or_else(|| PipelineError::NoScienceMember(product.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Member;

    fn product(members: &[(&str, &str)]) -> ExposureProduct {
        ExposureProduct {
            name: "prod".into(),
            members: members
                .iter()
                .map(|(ty, path)| Member::new(*ty, *path))
                .collect(),
        }
    }

    fn path_of(exposure: &ExposureRef) -> String {
        exposure.display_name()
    }

    #[test]
    fn groups_are_case_insensitive_and_ordered() {
        let p = product(&[("SCIENCE", "a"), ("background", "b1"), ("Background", "b2")]);
        let groups = members_by_type(&p);
        let bkg: Vec<_> = members_of(&groups, "background").into_iter().map(path_of).collect();
        assert_eq!(bkg, ["b1", "b2"]);
        assert_eq!(members_of(&groups, "science").len(), 1);
        assert!(members_of(&groups, "imprint").is_empty());
    }

    #[test]
    fn duplicate_science_picks_first() {
        let p = product(&[("science", "first"), ("science", "second")]);
        let groups = members_by_type(&p);
        assert_eq!(path_of(select_science(&p, &groups).unwrap()), "first");
    }

    #[test]
    fn missing_science_is_an_error() {
        let p = product(&[("background", "b")]);
        let groups = members_by_type(&p);
        assert!(matches!(
            select_science(&p, &groups),
            Err(PipelineError::NoScienceMember(name)) if name == "prod"
        ));
    }
}
