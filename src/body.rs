use anyhow::{anyhow, Result};

use log::debug;

use crate::grammar::{
    augment, builtin_element_grammar, document_grammar, fragment_grammar,
    Grammar, GrammarFrame, GrammarId, GrammarRule, ValueType,
    GR_START_TAG_CONTENT,
};
use crate::options::Options;
use crate::schema::{builtin_simple_types, ExiSchema, SimpleType};
use crate::string_tables::StringTables;
use crate::{ExiError, QNameId};

/// State of one EXI body, shared between decoding and encoding: the string
/// tables, the grammar pool and stack, and the engine context.
///
/// Everything here is owned by the stream. Schema-informed streams clone
/// the schema's tables and pool at init, so a static schema can keep
/// serving other streams while this one learns productions.
#[derive(Debug)]
pub(crate) struct Body {
    pub opts: Options,
    pub tables: StringTables,
    pub pool: Vec<Grammar>,
    pub stack: Vec<GrammarFrame>,
    /// Current left-hand-side non-terminal in the top grammar.
    pub non_term: usize,
    /// Last SE qname; the context for CH values and the nil switch.
    pub curr_elem: QNameId,
    /// Last AT qname; the context for attribute values.
    pub curr_attr: QNameId,
    /// Type stashed by an AT production for the following value call.
    pub expect_at: Option<ValueType>,
    pub simple_types: Vec<SimpleType>,
    pub done: bool,
}

impl Body {
    pub fn new(opts: Options, schema: Option<&ExiSchema>) -> Body {
        let (tables, mut pool, simple_types, globals) = match schema {
            Some(schema) => {
                let mut pool = schema.pool.clone();
                augment::augment_pool(&mut pool, &opts, &schema.simple_types);
                (
                    StringTables::with_uris(schema.uris.clone()),
                    pool,
                    schema.simple_types.clone(),
                    Some(schema.global_elements.clone()),
                )
            }
            None => (
                StringTables::initial(),
                Vec::new(),
                builtin_simple_types(),
                None,
            ),
        };

        let doc = if opts.fragment {
            fragment_grammar(&opts, globals.as_deref())
        } else {
            document_grammar(&opts, globals.as_deref())
        };
        pool.push(doc);
        let doc_id = pool.len() - 1;

        let mut tables = tables;
        if opts.wants_value_hash() {
            tables.values.enable_hash();
        }

        Body {
            opts,
            tables,
            pool,
            stack: vec![GrammarFrame::new(doc_id)],
            non_term: 0,
            curr_elem: QNameId::new(0, 0),
            curr_attr: QNameId::new(0, 0),
            expect_at: None,
            simple_types,
            done: false,
        }
    }

    pub fn current_grammar(&self) -> Result<&Grammar> {
        let frame = self
            .stack
            .last()
            .ok_or(ExiError::InconsistentProcState)?;
        self.pool
            .get(frame.grammar)
            .ok_or_else(|| anyhow!(ExiError::InconsistentProcState))
    }

    pub fn current_rule(&self) -> Result<&GrammarRule> {
        self.current_grammar()?
            .rule(self.non_term)
            .ok_or_else(|| anyhow!(ExiError::InconsistentProcState))
    }

    pub fn current_rule_mut(&mut self) -> Result<&mut GrammarRule> {
        let frame = *self
            .stack
            .last()
            .ok_or(ExiError::InconsistentProcState)?;
        let non_term = self.non_term;
        self.pool
            .get_mut(frame.grammar)
            .and_then(|g| g.rule_mut(non_term))
            .ok_or_else(|| anyhow!(ExiError::InconsistentProcState))
    }

    pub fn in_builtin_element(&self) -> bool {
        self.current_grammar()
            .map(|g| g.grammar_type.is_builtin_elem())
            .unwrap_or(false)
    }

    pub fn in_schema_grammar(&self) -> bool {
        self.current_grammar()
            .map(|g| g.grammar_type.is_schema())
            .unwrap_or(false)
    }

    /// SE transition: remember where the parent resumes, then enter the
    /// element's grammar, creating a fresh built-in one on first sight of
    /// the qname.
    pub fn push_element(
        &mut self,
        qname: QNameId,
        resume_at: usize,
    ) -> Result<()> {
        let frame = self
            .stack
            .last_mut()
            .ok_or(ExiError::InconsistentProcState)?;
        frame.last_non_term = resume_at;

        let bound = self
            .tables
            .uris
            .row(qname.uri)
            .and_then(|row| row.locals.row(qname.ln))
            .and_then(|row| row.type_grammar);
        let grammar = match bound {
            Some(id) => id,
            None => {
                let id = self.create_builtin_element_grammar();
                let row = self
                    .tables
                    .uris
                    .row_mut(qname.uri)
                    .and_then(|row| row.locals.row_mut(qname.ln))
                    .ok_or(ExiError::InconsistentProcState)?;
                row.type_grammar = Some(id);
                id
            }
        };
        debug!(
            "SE ({},{}) enters grammar {grammar}",
            qname.uri, qname.ln
        );
        self.stack.push(GrammarFrame::new(grammar));
        self.non_term = GR_START_TAG_CONTENT;
        self.curr_elem = qname;
        Ok(())
    }

    fn create_builtin_element_grammar(&mut self) -> GrammarId {
        self.pool.push(builtin_element_grammar(&self.opts));
        self.pool.len() - 1
    }

    /// EE with a void right-hand side: leave the element grammar and
    /// restore the caller's state.
    pub fn pop_element(&mut self) -> Result<()> {
        self.stack
            .pop()
            .ok_or(ExiError::InconsistentProcState)?;
        if let Some(frame) = self.stack.last() {
            self.non_term = frame.last_non_term;
        }
        Ok(())
    }

    /// `xsi:nil = true` in a schema grammar: swap the element's type
    /// grammar for its empty-content sibling.
    pub fn switch_to_empty_grammar(&mut self) -> Result<()> {
        self.stack
            .pop()
            .ok_or(ExiError::InconsistentProcState)?;
        let empty = self
            .tables
            .uris
            .row(self.curr_elem.uri)
            .and_then(|row| row.locals.row(self.curr_elem.ln))
            .and_then(|row| row.type_empty_grammar)
            .ok_or(ExiError::InconsistentProcState)?;
        self.stack.push(GrammarFrame::new(empty));
        self.non_term = GR_START_TAG_CONTENT;
        Ok(())
    }

    /// Facet bounds backing a small-integer production.
    pub fn small_int_bounds(
        &self,
        value: ValueType,
    ) -> Result<(i64, i64)> {
        value
            .simple_type
            .and_then(|id| self.simple_types.get(usize::from(id)))
            .and_then(SimpleType::bounds)
            .ok_or_else(|| anyhow!(ExiError::InvalidInput))
    }
}
