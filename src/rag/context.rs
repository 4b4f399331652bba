//! Grounding context assembly.
//!
//! Ranked chunk texts are joined with a blank line until the character
//! budget runs out. Chunks are taken whole or not at all; the answering
//! model never sees a chunk cut mid-sentence.

use super::store::ChunkHit;

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    budget_chars: usize,
}

impl ContextAssembler {
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    /// Concatenates hit texts in ranked order. Returns an empty string when
    /// nothing matched so the prompt layer can signal "no grounding"
    /// instead of fabricating context.
    pub fn assemble(&self, hits: &[ChunkHit]) -> String {
        let mut context = String::new();
        let mut used = 0usize;

        for hit in hits {
            let text_len = hit.chunk.text.chars().count();
            let sep_len = if context.is_empty() {
                0
            } else {
                SEPARATOR.len()
            };

            if used + sep_len + text_len > self.budget_chars {
                break;
            }

            if !context.is_empty() {
                context.push_str(SEPARATOR);
            }
            context.push_str(&hit.chunk.text);
            used += sep_len + text_len;
        }

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::store::StoredChunk;

    fn hit(id: i64, text: &str) -> ChunkHit {
        ChunkHit {
            chunk: StoredChunk {
                id,
                document_id: "doc".to_string(),
                text: text.to_string(),
                start_offset: 0,
            },
            score: 1.0,
        }
    }

    #[test]
    fn joins_ranked_chunks_with_blank_lines() {
        let assembler = ContextAssembler::new(100);
        let context = assembler.assemble(&[hit(1, "alpha"), hit(2, "beta"), hit(3, "gamma")]);
        assert_eq!(context, "alpha\n\nbeta\n\ngamma");
    }

    #[test]
    fn stops_before_exceeding_the_budget() {
        // "alpha" (5) + sep (2) + "beta" (4) = 11; a third chunk would need
        // 2 + 5 = 7 more.
        let assembler = ContextAssembler::new(12);
        let context = assembler.assemble(&[hit(1, "alpha"), hit(2, "beta"), hit(3, "gamma")]);

        assert_eq!(context, "alpha\n\nbeta");
        assert!(context.chars().count() <= 12);
    }

    #[test]
    fn never_emits_a_truncated_chunk() {
        let assembler = ContextAssembler::new(9);
        let context = assembler.assemble(&[hit(1, "alpha"), hit(2, "beta-longer"), hit(3, "x")]);
        // "beta-longer" does not fit whole, so assembly stops there; no
        // fragment of it (or anything ranked below it) leaks through.
        assert_eq!(context, "alpha");
    }

    #[test]
    fn empty_hits_produce_empty_context() {
        let assembler = ContextAssembler::new(100);
        assert_eq!(assembler.assemble(&[]), "");
    }

    #[test]
    fn single_oversized_chunk_yields_empty_context() {
        let assembler = ContextAssembler::new(3);
        assert_eq!(assembler.assemble(&[hit(1, "too long for budget")]), "");
    }
}
