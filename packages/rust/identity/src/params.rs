//! Known identifier query-parameter names, in priority order.

/// Parameter names that carry the post identity on known board software,
/// scanned first-match-wins. Ordering matters: the national-standard names
/// come first, then common sequence/index spellings with their case
/// variants, then vendor-specific names seen in the field.
///
/// Matching is exact (case-sensitive) — the case variants are spelled out
/// here rather than folded, because `no` as a pagination parameter and
/// `NO` as a post id coexist on real sites.
pub const KNOWN_ID_PARAMS: &[&str] = &[
    // National-standard board framework names.
    "nttId",
    "nttSn",
    "nttNo",
    "bbsSeq",
    "bbsSn",
    "boardSeq",
    "board_seq",
    "articleSeq",
    "articleNo",
    "article_no",
    // Generic sequence / index spellings.
    "seq",
    "seqNo",
    "seqno",
    "SEQ",
    "idx",
    "IDX",
    "bIdx",
    "b_idx",
    "num",
    "no",
    "No",
    "NO",
    // Vendor-specific board software.
    "wr_id",
    "document_srl",
    "post_id",
    "postId",
    "postSeq",
    "mgtNo",
    "mgt_no",
    "ntceNo",
    "uid",
    // Last-resort generic id.
    "id",
    "ID",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_names_outrank_generic_id() {
        let ntt = KNOWN_ID_PARAMS.iter().position(|p| *p == "nttId").unwrap();
        let seq = KNOWN_ID_PARAMS.iter().position(|p| *p == "seq").unwrap();
        let id = KNOWN_ID_PARAMS.iter().position(|p| *p == "id").unwrap();
        assert!(ntt < seq);
        assert!(seq < id);
    }

    #[test]
    fn no_duplicate_names() {
        let mut sorted: Vec<&str> = KNOWN_ID_PARAMS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), KNOWN_ID_PARAMS.len());
    }
}
