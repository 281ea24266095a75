use std::cmp::Ordering;

/// Outcome of aligning two basename-sorted sequences.
#[derive(Debug, PartialEq, Eq)]
pub enum Merged<L, R> {
    OnlyInLeft(L),
    OnlyInRight(R),
    InBoth(L, R),
}

/// Three-way merge of two sequences sorted ascending by key.
/// Duplicate keys pair up positionally.
pub fn merge_sorted<'l, 'r, L, R>(
    left: &'l [L],
    right: &'r [R],
    left_key: impl Fn(&'l L) -> &'l str,
    right_key: impl Fn(&'r R) -> &'r str,
) -> Vec<Merged<&'l L, &'r R>>
{
    let mut out = Vec::with_capacity(left.len().max(right.len()));
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left_key(&left[i]).cmp(right_key(&right[j])) {
            Ordering::Less => {
                out.push(Merged::OnlyInLeft(&left[i]));
                i += 1;
            }
            Ordering::Greater => {
                out.push(Merged::OnlyInRight(&right[j]));
                j += 1;
            }
            Ordering::Equal => {
                out.push(Merged::InBoth(&left[i], &right[j]));
                i += 1;
                j += 1;
            }
        }
    }
    out.extend(left[i..].iter().map(Merged::OnlyInLeft));
    out.extend(right[j..].iter().map(Merged::OnlyInRight));
    out
}
