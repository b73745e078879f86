//! SQL source generator.
//!
//! Deterministic, no optimisation: the same tree always prints to the same
//! text. Output is ASCII SQL accepted by PostgreSQL 13 and later.

mod keywords;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::Error;
use crate::ir::{NullsOrder, SortDir};
use crate::pgast::{
    CaseWhen, ColumnRef, CteId, Expr, FuncCall, IndirectionOp, JoinType, OnConflictAction, Rel,
    RelId, RelKind, RelStore, ResTarget, RvarId, RvarKind, SortBy, SqlTree, SubLinkOp, WindowDef,
};
use crate::Result;

/// Generate SQL text for a finished tree.
pub fn generate_source(tree: &SqlTree) -> Result<String> {
    let mut gen = SqlSourceGenerator::new(&tree.store);
    gen.visit_rel(tree.root)?;
    Ok(gen.finish())
}

/// Generate SQL text plus the parameter index: `$N` placeholders in order
/// of first appearance.
pub fn generate_source_with_params(tree: &SqlTree) -> Result<(String, Vec<usize>)> {
    let mut gen = SqlSourceGenerator::new(&tree.store);
    gen.visit_rel(tree.root)?;
    let params = gen.param_index.keys().copied().collect();
    Ok((gen.finish(), params))
}

/// Quote an identifier if it cannot appear unquoted.
pub fn quote_ident(ident: &str) -> String {
    quote_ident_ex(ident, false)
}

pub fn quote_ident_ex(ident: &str, force: bool) -> String {
    let safe = !ident.is_empty()
        && ident
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_lowercase() || (i > 0 && c.is_ascii_digit()))
        && !keywords::is_reserved(ident);

    if safe && !force {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Quote a possibly-qualified name.
pub fn qname(parts: &[String]) -> String {
    parts.iter().map(|p| quote_ident(p)).join(".")
}

/// Quote a string literal. `E'...'` is used only for strings containing
/// line breaks or backslashes.
pub fn quote_literal(val: &str) -> String {
    if val.contains('\\') || val.contains('\n') {
        let escaped = val
            .replace('\\', "\\\\")
            .replace('\'', "''")
            .replace('\n', "\\n");
        format!("E'{escaped}'")
    } else {
        format!("'{}'", val.replace('\'', "''"))
    }
}

pub fn quote_bytea_literal(val: &[u8]) -> String {
    let hex: String = val.iter().map(|b| format!("{b:02x}")).collect();
    format!("'\\x{hex}'::bytea")
}

/// Quote a type name; the last component may carry a `[]` suffix which
/// must stay outside the quotes.
pub fn quote_type(name: &[String]) -> String {
    let (last, init) = name.split_last().expect("type name cannot be empty");
    let (base, suffix) = match last.strip_suffix("[]") {
        Some(base) => (base, "[]"),
        None => (last.as_str(), ""),
    };
    let mut out = String::new();
    for part in init {
        out.push_str(&quote_ident(part));
        out.push('.');
    }
    out.push_str(&quote_ident(base));
    out.push_str(suffix);
    out
}

struct SqlSourceGenerator<'a> {
    store: &'a RelStore,
    result: Vec<String>,
    indentation: usize,
    new_lines: usize,
    param_index: IndexMap<usize, usize>,
}

const INDENT: &str = "    ";

impl<'a> SqlSourceGenerator<'a> {
    fn new(store: &'a RelStore) -> SqlSourceGenerator<'a> {
        SqlSourceGenerator {
            store,
            result: Vec::new(),
            indentation: 0,
            new_lines: 0,
            param_index: IndexMap::new(),
        }
    }

    fn finish(self) -> String {
        self.result.concat()
    }

    fn unknown_node(&self, what: &str) -> Error {
        Error::new_internal(format!("no method to generate code for {what}"))
    }

    fn write(&mut self, chunk: &str) {
        if self.new_lines > 0 {
            for _ in 0..self.new_lines {
                self.result.push("\n".to_string());
            }
            self.result.push(INDENT.repeat(self.indentation));
            self.new_lines = 0;
        }
        self.result.push(chunk.to_string());
    }

    fn rel(&self, id: RelId) -> &'a Rel {
        self.store.rel(id)
    }

    // ---- relations ----------------------------------------------------

    fn visit_rel(&mut self, id: RelId) -> Result<()> {
        let rel = self.rel(id);
        match &rel.kind {
            RelKind::Table(table) => {
                match &table.schemaname {
                    None => self.write(&quote_ident(&table.relname)),
                    Some(schema) => {
                        self.write(&format!(
                            "{}.{}",
                            quote_ident(schema),
                            quote_ident(&table.relname)
                        ));
                    }
                }
                Ok(())
            }
            RelKind::NullRelation => self.visit_null_relation(id),
            RelKind::Select(_) => self.visit_select_stmt(id),
            RelKind::Insert(_) => self.visit_insert_stmt(id),
            RelKind::Update(_) => self.visit_update_stmt(id),
            RelKind::Delete(_) => self.visit_delete_stmt(id),
        }
    }

    fn gen_ctes(&mut self, ctes: &[CteId]) -> Result<()> {
        let count = ctes.len();
        for (i, cte_id) in ctes.iter().enumerate() {
            let cte = self.store.cte(*cte_id);
            self.new_lines = 1;
            if cte.recursive {
                self.write("RECURSIVE ");
            }
            self.write(&quote_ident(&cte.name));
            if !cte.aliascolnames.is_empty() {
                let cols = cte.aliascolnames.iter().map(|c| quote_ident(c)).join(",");
                self.write(&format!("({cols})"));
            }
            self.write(" AS ");
            match cte.materialized {
                Some(true) => self.write("MATERIALIZED "),
                Some(false) => self.write("NOT MATERIALIZED "),
                None => {}
            }
            self.indentation += 1;
            self.new_lines = 1;
            self.write("(");
            self.visit_rel(cte.query)?;
            self.write(")");
            if i != count - 1 {
                self.write(",");
            }
            self.indentation -= 1;
        }
        self.new_lines = 1;
        Ok(())
    }

    fn visit_null_relation(&mut self, id: RelId) -> Result<()> {
        let rel = self.rel(id);
        self.write("(SELECT ");
        self.visit_list(&rel.target_list.clone(), |s, t| s.visit_res_target(t))?;
        if let Some(where_clause) = &rel.where_clause {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("WHERE");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_expr(&where_clause.clone())?;
            self.indentation -= 2;
        }
        self.write(")");
        Ok(())
    }

    fn visit_values(&mut self, values: &[Expr]) -> Result<()> {
        self.new_lines = 1;
        self.write("(");
        self.write("VALUES");
        self.new_lines = 1;
        self.indentation += 1;
        for (i, row) in values.iter().enumerate() {
            if i > 0 {
                self.write(",");
                self.new_lines = 1;
            }
            self.visit_expr(row)?;
        }
        self.indentation -= 1;
        self.new_lines = 1;
        self.write(")");
        Ok(())
    }

    fn visit_select_stmt(&mut self, id: RelId) -> Result<()> {
        let rel = self.rel(id).clone();
        let stmt = rel.select().expect("select stmt").clone();

        if !stmt.values.is_empty() {
            return self.visit_values(&stmt.values);
        }

        // A very crude detection of whether this SELECT is a top level
        // statement.
        let parenthesize = !self.result.is_empty();

        if parenthesize {
            self.new_lines = 1;
            self.write("(");
        }

        if !rel.ctes.is_empty() {
            self.write("WITH ");
            self.gen_ctes(&rel.ctes)?;
        }

        if let Some(op) = stmt.op {
            // Upper level set operation node (UNION/INTERSECT).
            self.visit_rel(stmt.larg.expect("set op without larg"))?;
            self.write(&format!(" {} ", op.as_sql()));
            if stmt.all {
                self.write("ALL ");
            }
            self.visit_rel(stmt.rarg.expect("set op without rarg"))?;
        } else {
            self.write("SELECT");
            if let Some(distinct) = &stmt.distinct_clause {
                self.write(" DISTINCT");
                if !distinct.is_empty() {
                    self.write(" ON (");
                    self.visit_list_inline(distinct, |s, e| s.visit_expr(e))?;
                    self.write(")");
                }
            }
            self.new_lines = 1;
            self.indentation += 2;
            self.visit_list(&rel.target_list, |s, t| s.visit_res_target(t))?;
            self.indentation -= 2;

            if !stmt.from_clause.is_empty() {
                self.indentation += 1;
                self.new_lines = 1;
                self.write("FROM");
                self.new_lines = 1;
                self.indentation += 1;
                self.visit_list(&stmt.from_clause, |s, rv| s.visit_rvar(*rv))?;
                self.indentation -= 2;
            }
        }

        if let Some(where_clause) = &rel.where_clause {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("WHERE");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_expr(where_clause)?;
            self.indentation -= 2;
        }

        if !stmt.group_clause.is_empty() {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("GROUP BY");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_list(&stmt.group_clause, |s, e| s.visit_expr(e))?;
            self.indentation -= 2;
        }

        if let Some(having) = &stmt.having {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("HAVING");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_expr(having)?;
            self.indentation -= 2;
        }

        if !stmt.sort_clause.is_empty() {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("ORDER BY");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_list(&stmt.sort_clause, |s, e| s.visit_sort_by(e))?;
            self.indentation -= 2;
        }

        if let Some(offset) = &stmt.limit_offset {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("OFFSET ");
            self.visit_expr(offset)?;
            self.indentation -= 1;
        }

        if let Some(count) = &stmt.limit_count {
            self.indentation += 1;
            self.new_lines = 1;
            self.write("LIMIT ");
            self.visit_expr(count)?;
            self.indentation -= 1;
        }

        if parenthesize {
            self.new_lines = 1;
            self.write(")");
        }

        Ok(())
    }

    fn visit_insert_stmt(&mut self, id: RelId) -> Result<()> {
        let rel = self.rel(id).clone();
        let stmt = rel.kind.as_insert().expect("insert stmt").clone();

        if !rel.ctes.is_empty() {
            self.write("WITH ");
            self.gen_ctes(&rel.ctes)?;
        }

        self.write("INSERT INTO ");
        self.visit_rvar(stmt.relation)?;
        if !stmt.cols.is_empty() {
            self.new_lines = 1;
            self.indentation += 1;
            let cols = stmt.cols.iter().map(|c| quote_ident(c)).join(", ");
            self.write(&format!("({cols})"));
            self.indentation -= 1;
        }

        self.indentation += 1;
        self.new_lines = 1;

        if let Some(select_stmt) = stmt.select_stmt {
            let is_values = matches!(
                &self.rel(select_stmt).kind,
                RelKind::Select(s) if !s.values.is_empty()
            );
            if is_values {
                let values = self
                    .rel(select_stmt)
                    .select()
                    .expect("values stmt")
                    .values
                    .clone();
                self.write("VALUES ");
                self.new_lines = 1;
                self.indentation += 1;
                self.visit_list(&values, |s, e| s.visit_expr(e))?;
                self.indentation -= 1;
            } else {
                self.write("(");
                self.visit_rel(select_stmt)?;
                self.write(")");
            }
        }

        if let Some(on_conflict) = &stmt.on_conflict {
            self.new_lines = 1;
            self.write("ON CONFLICT");
            if let Some(infer) = &on_conflict.infer {
                if let Some(conname) = &infer.conname {
                    self.write(&format!(" ON CONSTRAINT {conname}"));
                } else {
                    self.write(" (");
                    self.visit_list_inline(
                        &infer
                            .index_elems
                            .iter()
                            .cloned()
                            .map(Expr::ColumnRef)
                            .collect_vec(),
                        |s, e| s.visit_expr(e),
                    )?;
                    self.write(")");
                }
            }
            self.write(" DO ");
            match on_conflict.action {
                OnConflictAction::DoNothing => self.write("NOTHING"),
                OnConflictAction::DoUpdate => {
                    self.write("UPDATE");
                    self.write(" SET");
                    self.new_lines = 1;
                    self.indentation += 1;
                    if let Some(multi) = &on_conflict.multi_assign {
                        let cols = multi.columns.iter().map(|c| quote_ident(c)).join(", ");
                        self.write(&format!("({cols}) = "));
                        self.visit_expr(&multi.source)?;
                    }
                    for (i, target) in on_conflict.target_list.iter().enumerate() {
                        if i > 0 || on_conflict.multi_assign.is_some() {
                            self.write(",");
                            self.new_lines = 1;
                        }
                        self.write(&quote_ident(&target.name));
                        self.write(" = ");
                        self.visit_expr(&target.val)?;
                    }
                    self.indentation -= 1;
                }
            }
        }

        self.gen_returning(&rel.target_list)?;
        self.indentation -= 1;
        Ok(())
    }

    fn visit_update_stmt(&mut self, id: RelId) -> Result<()> {
        let rel = self.rel(id).clone();
        let stmt = rel.kind.as_update().expect("update stmt").clone();

        if !rel.ctes.is_empty() {
            self.write("WITH ");
            self.gen_ctes(&rel.ctes)?;
        }

        self.write("UPDATE");
        self.new_lines = 1;
        self.indentation += 1;
        self.visit_rvar(stmt.relation)?;
        self.indentation -= 1;
        self.new_lines = 1;
        self.write("SET");
        self.new_lines = 1;
        self.indentation += 1;
        for (i, target) in stmt.targets.iter().enumerate() {
            if i > 0 {
                self.write(",");
                self.new_lines = 1;
            }
            self.write(&quote_ident(&target.name));
            self.write(" = ");
            self.visit_expr(&target.val)?;
        }
        self.indentation -= 1;

        if !stmt.from_clause.is_empty() {
            self.new_lines = 1;
            self.write("FROM");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_list(&stmt.from_clause, |s, rv| s.visit_rvar(*rv))?;
            self.indentation -= 1;
        }

        if let Some(where_clause) = &rel.where_clause {
            self.new_lines = 1;
            self.write("WHERE");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_expr(where_clause)?;
            self.new_lines = 1;
            self.indentation -= 1;
        }

        self.gen_returning(&rel.target_list)?;
        Ok(())
    }

    fn visit_delete_stmt(&mut self, id: RelId) -> Result<()> {
        let rel = self.rel(id).clone();
        let stmt = rel.kind.as_delete().expect("delete stmt").clone();

        if !rel.ctes.is_empty() {
            self.write("WITH ");
            self.gen_ctes(&rel.ctes)?;
        }

        self.write("DELETE FROM");
        self.new_lines = 1;
        self.indentation += 1;
        self.visit_rvar(stmt.relation)?;
        self.indentation -= 1;

        if !stmt.using_clause.is_empty() {
            self.new_lines = 1;
            self.write("USING");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_list(&stmt.using_clause, |s, rv| s.visit_rvar(*rv))?;
            self.indentation -= 1;
        }

        if let Some(where_clause) = &rel.where_clause {
            self.new_lines = 1;
            self.write("WHERE");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_expr(where_clause)?;
            self.new_lines = 1;
            self.indentation -= 1;
        }

        self.gen_returning(&rel.target_list)?;
        Ok(())
    }

    fn gen_returning(&mut self, returning: &[ResTarget]) -> Result<()> {
        if !returning.is_empty() {
            self.new_lines = 1;
            self.write("RETURNING");
            self.new_lines = 1;
            self.indentation += 1;
            self.visit_list(returning, |s, t| s.visit_res_target(t))?;
            self.indentation -= 1;
        }
        Ok(())
    }

    // ---- range vars ---------------------------------------------------

    fn visit_rvar(&mut self, id: RvarId) -> Result<()> {
        let rvar = self.store.rvar(id).clone();
        match &rvar.kind {
            RvarKind::Relation {
                rel,
                include_inherited,
            } => {
                if !include_inherited {
                    self.write(" ONLY (");
                }
                let target = self.rel(*rel);
                if !target.is_terminal() {
                    return Err(self.unknown_node("a non-terminal relation in a relation rvar"));
                }
                self.visit_rel(*rel)?;
                if !include_inherited {
                    self.write(")");
                }
            }
            RvarKind::Cte(cte) => {
                let name = self.store.cte(*cte).name.clone();
                self.write(&quote_ident(&name));
            }
            RvarKind::Subselect { lateral, rel } => {
                if *lateral {
                    self.write("LATERAL ");
                }
                self.visit_rel(*rel)?;
            }
            RvarKind::Function {
                lateral,
                with_ordinality,
                is_rowsfrom,
                functions,
            } => {
                if *lateral {
                    self.write("LATERAL ");
                }
                if *is_rowsfrom {
                    self.write("ROWS FROM (");
                }
                for (i, func) in functions.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.visit_func_call(func)?;
                }
                if *is_rowsfrom {
                    self.write(")");
                }
                if *with_ordinality {
                    self.write(" WITH ORDINALITY ");
                }
            }
            RvarKind::Join {
                join_type,
                larg,
                rarg,
                quals,
            } => {
                self.visit_rvar(*larg)?;
                self.new_lines = 1;
                let join_type = if quals.is_none() && *join_type == JoinType::Inner {
                    JoinType::Cross
                } else {
                    *join_type
                };
                if join_type == JoinType::Inner {
                    self.write("JOIN ");
                } else {
                    self.write(&format!("{} JOIN ", join_type.as_sql()));
                }
                let nested_join =
                    matches!(&self.store.rvar(*rarg).kind, RvarKind::Join { .. });
                if nested_join {
                    self.write("(");
                    self.new_lines = 1;
                    self.indentation += 1;
                }
                self.visit_rvar(*rarg)?;
                if nested_join {
                    self.indentation -= 1;
                    self.new_lines = 1;
                    self.write(")");
                }
                if let Some(quals) = quals {
                    if !nested_join {
                        self.indentation += 1;
                        self.new_lines = 1;
                        self.write("ON ");
                    } else {
                        self.write(" ON ");
                    }
                    self.visit_expr(quals)?;
                    if !nested_join {
                        self.indentation -= 1;
                    }
                }
                // Joins carry no alias of their own.
                return Ok(());
            }
            RvarKind::Intersection { .. } => {
                return Err(self.unknown_node("IntersectionRangeVar"));
            }
        }

        if !rvar.alias.aliasname.is_empty() {
            self.write(" AS ");
            self.write(&quote_ident(&rvar.alias.aliasname));
            if !rvar.alias.colnames.is_empty() {
                let cols = rvar.alias.colnames.iter().map(|c| quote_ident(c)).join(", ");
                self.write(&format!(" ({cols})"));
            }
        }
        Ok(())
    }

    // ---- expressions --------------------------------------------------

    fn visit_res_target(&mut self, target: &ResTarget) -> Result<()> {
        self.visit_expr(&target.val)?;
        if let Some(name) = &target.name {
            self.write(&format!(" AS {}", quote_ident(name)));
        }
        Ok(())
    }

    fn visit_sort_by(&mut self, sort: &SortBy) -> Result<()> {
        self.visit_expr(&sort.node)?;
        if let Some(dir) = sort.dir {
            let direction = match dir {
                SortDir::Asc => "ASC",
                SortDir::Desc => "DESC",
            };
            self.write(&format!(" {direction}"));

            // NULLS placement is always explicit, following the PostgreSQL
            // defaults when unspecified.
            let nulls = sort.nulls.unwrap_or(match dir {
                SortDir::Asc => NullsOrder::Last,
                SortDir::Desc => NullsOrder::First,
            });
            match nulls {
                NullsOrder::First => self.write(" NULLS FIRST"),
                NullsOrder::Last => self.write(" NULLS LAST"),
            }
        }
        Ok(())
    }

    fn visit_window_def(&mut self, over: &WindowDef) -> Result<()> {
        self.write(" OVER (");
        if !over.partition_clause.is_empty() {
            self.write("PARTITION BY ");
            self.visit_list_inline(&over.partition_clause, |s, e| s.visit_expr(e))?;
        }
        if !over.order_clause.is_empty() {
            if !over.partition_clause.is_empty() {
                self.write(" ");
            }
            self.write("ORDER BY ");
            self.visit_list_inline(&over.order_clause, |s, e| s.visit_sort_by(e))?;
        }
        self.write(")");
        Ok(())
    }

    fn visit_func_call(&mut self, node: &FuncCall) -> Result<()> {
        self.write(&qname(&node.name));
        self.write("(");
        if node.agg_star {
            self.write("*");
        } else {
            if node.agg_distinct {
                self.write("DISTINCT ");
            }
            self.visit_list_inline(&node.args, |s, e| s.visit_expr(e))?;
        }
        if !node.agg_order.is_empty() {
            self.write(" ORDER BY ");
            self.visit_list_inline(&node.agg_order, |s, e| s.visit_sort_by(e))?;
        }
        self.write(")");

        if let Some(filter) = &node.agg_filter {
            self.write(" FILTER (WHERE ");
            self.visit_expr(filter)?;
            self.write(")");
        }

        if let Some(over) = &node.over {
            self.visit_window_def(over)?;
        }

        if node.with_ordinality {
            self.write(" WITH ORDINALITY");
        }

        if !node.coldeflist.is_empty() {
            self.write(" AS (");
            for (i, col) in node.coldeflist.iter().enumerate() {
                if i > 0 {
                    self.write(", ");
                }
                self.write(&quote_ident(&col.name));
                self.write(" ");
                self.write(&quote_type(&col.typename.name));
            }
            self.write(")");
        }
        Ok(())
    }

    fn visit_column_ref(&mut self, node: &ColumnRef) {
        self.write(&qname(&node.name));
    }

    fn visit_case(
        &mut self,
        arg: Option<&Expr>,
        args: &[CaseWhen],
        defresult: Option<&Expr>,
    ) -> Result<()> {
        self.write("(CASE ");
        if let Some(arg) = arg {
            self.visit_expr(arg)?;
            self.write(" ");
        }
        for when in args {
            self.write("WHEN ");
            self.visit_expr(&when.expr)?;
            self.write(" THEN ");
            self.visit_expr(&when.result)?;
            self.write(" ");
        }
        if let Some(defresult) = defresult {
            self.write("ELSE ");
            self.visit_expr(defresult)?;
            self.write(" ");
        }
        self.write("END)");
        Ok(())
    }

    fn visit_indirection_ops(&mut self, ops: &[IndirectionOp]) -> Result<()> {
        for op in ops {
            match op {
                IndirectionOp::Index(idx) => {
                    self.write("[");
                    self.visit_expr(idx)?;
                    self.write("]");
                }
                IndirectionOp::Slice { lidx, ridx } => {
                    self.write("[");
                    if let Some(lidx) = lidx {
                        self.visit_expr(lidx)?;
                    }
                    self.write(":");
                    if let Some(ridx) = ridx {
                        self.visit_expr(ridx)?;
                    }
                    self.write("]");
                }
                IndirectionOp::Field(name) => {
                    self.write(".");
                    self.write(&quote_ident(name));
                }
            }
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::ColumnRef(node) => self.visit_column_ref(node),
            Expr::TupleVar(_) => {
                // Tuple vars must be unpacked or serialised by the
                // compiler before codegen.
                return Err(self.unknown_node("TupleVar"));
            }
            Expr::ParamRef { number } => {
                let next = self.param_index.len() + 1;
                self.param_index.entry(*number).or_insert(next);
                self.write(&format!("${number}"));
            }
            Expr::NamedParamRef { name } => {
                self.write(&qname(name));
            }
            Expr::StringConstant { val } => self.write(&quote_literal(val)),
            Expr::NumericConstant { val } => self.write(val),
            Expr::BooleanConstant { val } => self.write(if *val { "TRUE" } else { "FALSE" }),
            Expr::ByteaConstant { val } => self.write(&quote_bytea_literal(val)),
            Expr::NullConstant => self.write("NULL"),
            Expr::LiteralExpr { expr } => self.write(expr),
            Expr::OpExpr { name, lexpr, rexpr } => {
                self.write("(");
                if let Some(lexpr) = lexpr {
                    self.visit_expr(lexpr)?;
                    self.write(" ");
                }
                // Operator names are upcased unless qualified.
                let op = if name.contains('.') {
                    name.clone()
                } else {
                    name.to_uppercase()
                };
                self.write(&op);
                if let Some(rexpr) = rexpr {
                    self.write(" ");
                    self.visit_expr(rexpr)?;
                }
                self.write(")");
            }
            Expr::FuncCall(node) => self.visit_func_call(node)?,
            Expr::NamedFuncArg { name, val } => {
                self.write(&format!("{} => ", quote_ident(name)));
                self.visit_expr(val)?;
            }
            Expr::VariadicArgument { expr } => {
                self.write("VARIADIC ");
                self.visit_expr(expr)?;
            }
            Expr::TypeCast { arg, type_name } => {
                // '::' has very high precedence, so parenthesize the
                // expression.
                self.write("(");
                self.visit_expr(arg)?;
                self.write(")::");
                self.write(&quote_type(&type_name.name));
            }
            Expr::CaseExpr {
                arg,
                args,
                defresult,
            } => {
                self.visit_case(arg.as_deref(), args, defresult.as_deref())?;
            }
            Expr::CoalesceExpr { args } => {
                self.write("COALESCE(");
                self.visit_list_inline(args, |s, e| s.visit_expr(e))?;
                self.write(")");
            }
            Expr::NullTest { arg, negated } => {
                self.write("(");
                self.visit_expr(arg)?;
                self.write(if *negated { " IS NOT NULL" } else { " IS NULL" });
                self.write(")");
            }
            Expr::BooleanTest {
                arg,
                negated,
                is_true,
            } => {
                self.write("(");
                self.visit_expr(arg)?;
                self.write(" IS");
                if *negated {
                    self.write(" NOT");
                }
                self.write(if *is_true { " TRUE" } else { " FALSE" });
                self.write(")");
            }
            Expr::RowExpr { args } => {
                self.write("ROW(");
                self.visit_list_inline(args, |s, e| s.visit_expr(e))?;
                self.write(")");
            }
            Expr::ImplicitRowExpr { args } => {
                self.write("(");
                self.visit_list_inline(args, |s, e| s.visit_expr(e))?;
                self.write(")");
            }
            Expr::ArrayExpr { elements } => {
                self.write("ARRAY[");
                self.visit_list_inline(elements, |s, e| s.visit_expr(e))?;
                self.write("]");
            }
            Expr::Indirection { arg, ops } => {
                self.write("(");
                self.visit_expr(arg)?;
                self.write(")");
                self.visit_indirection_ops(ops)?;
            }
            Expr::Subquery(rel) => {
                self.visit_rel(*rel)?;
            }
            Expr::SubLink {
                op,
                test_expr,
                operator,
                rel,
            } => {
                if let Some(test_expr) = test_expr {
                    self.visit_expr(test_expr)?;
                    self.write(" ");
                }
                if let Some(operator) = operator {
                    self.write(operator);
                    self.write(" ");
                }
                match op {
                    SubLinkOp::Exists => self.write("EXISTS "),
                    SubLinkOp::NotExists => self.write("NOT EXISTS "),
                    SubLinkOp::Any => self.write("ANY "),
                    SubLinkOp::All => self.write("ALL "),
                }
                self.write("(");
                self.indentation += 1;
                self.visit_rel(*rel)?;
                self.indentation -= 1;
                self.new_lines = 1;
                self.write(")");
            }
        }
        Ok(())
    }

    // ---- helpers ------------------------------------------------------

    fn visit_list<T: Clone>(
        &mut self,
        items: &[T],
        mut f: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        let items = items.to_vec();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(",");
                self.new_lines = 1;
            }
            f(self, item)?;
        }
        Ok(())
    }

    fn visit_list_inline<T: Clone>(
        &mut self,
        items: &[T],
        mut f: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        let items = items.to_vec();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            f(self, item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use insta::assert_snapshot;

    use super::*;
    use crate::pgast::{BaseTable, Rel, RelKind, Rvar, RvarKind, SelectStmt};

    #[test]
    fn quoting() {
        assert_snapshot!(quote_ident("title"), @"title");
        assert_snapshot!(quote_ident("Select"), @r###""Select""###);
        assert_snapshot!(quote_ident("from"), @r###""from""###);
        assert_snapshot!(quote_ident("v~1"), @r###""v~1""###);
        assert_snapshot!(quote_literal("it's"), @"'it''s'");
        assert_snapshot!(quote_literal("a\nb"), @r###"E'a\nb'"###);
        assert_snapshot!(quote_literal("a\\b"), @r###"E'a\\b'"###);
        assert_snapshot!(quote_type(&["int8[]".to_string()]), @"int8[]");
        assert_snapshot!(
            quote_bytea_literal(b"hi"),
            @r###"'\x6869'::bytea"###
        );
    }

    #[test]
    fn simple_select() {
        let mut store = RelStore::new();
        let table = store.add_rel(Rel::new(RelKind::Table(BaseTable {
            schemaname: Some("edgedbpub".to_string()),
            relname: "default::Movie".to_string(),
        })));
        let rvar = store.add_rvar(Rvar::new(
            RvarKind::Relation {
                rel: table,
                include_inherited: true,
            },
            crate::pgast::Alias::new("movie~1"),
        ));

        let root = store.add_rel(Rel::new(RelKind::Select(SelectStmt {
            from_clause: vec![rvar],
            ..SelectStmt::default()
        })));
        store.rel_mut(root).target_list.push(ResTarget::new(
            Some("title".to_string()),
            Expr::ColumnRef(ColumnRef::new(vec![
                "movie~1".to_string(),
                "title".to_string(),
            ])),
        ));

        let tree = SqlTree { root, store };
        assert_snapshot!(generate_source(&tree).unwrap(), @r###"
        SELECT
                "movie~1".title AS title
            FROM
                edgedbpub."default::Movie" AS "movie~1"
        "###);
    }
}
