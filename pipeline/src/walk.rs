use fluentd::{Directive, Fragment};

use crate::StageError;

/// Visits every directive post-order (children before parent), calling
/// `f` in place. Mirrors the teacher's `applyRecursivelyInPlace`.
pub fn apply_recursively_in_place(
    fragment: &mut Fragment,
    f: &mut impl FnMut(&mut Directive) -> Result<(), StageError>,
) -> Result<(), StageError> {
    for d in fragment.iter_mut() {
        apply_recursively_in_place(&mut d.nested, f)?;
        f(d)?;
    }
    Ok(())
}

/// Visits every directive post-order, letting `f` replace one directive
/// with zero or more replacements. Mirrors `applyRecursivelyWithState`,
/// used by stages that expand (tag braces) or drop (unreferenced bridges)
/// directives.
pub fn apply_recursively_expanding(
    fragment: Fragment,
    f: &mut impl FnMut(Directive) -> Result<Vec<Directive>, StageError>,
) -> Result<Fragment, StageError> {
    let mut out = Vec::with_capacity(fragment.len());
    for mut d in fragment {
        d.nested = apply_recursively_expanding(std::mem::take(&mut d.nested), f)?;
        out.extend(f(d)?);
    }
    Ok(out)
}
