//! SQL-backed `RelationStore`
//!
//! Statements are built with SeaQuery for PostgreSQL and handed, with their bound values, to a
//! [`SqlExecutor`]. The executor owns the connection (and any transaction); the store only knows
//! how to express reads, inserts, updates, deletes and junction-row changes for the associations
//! declared in its [`Schema`].

use super::{assign_foreign_key, clear_foreign_key, junction_row, RelationStore};
use crate::error::StoreError;
use crate::model::Record;
use crate::relation::helpers::join_condition;
use crate::relation::identity::{Identity, KeyPart};
use crate::schema::{Association, ModelSchema, Schema};
use log::debug;
use sea_query::{
    Alias, Asterisk, Condition, ConditionalStatement, DeleteStatement, Expr, ExprTrait,
    InsertStatement, JoinType, PostgresQueryBuilder, Query, SelectStatement, UpdateStatement,
    Value,
};
use serde_json::{Map, Value as JsonValue};

type Row = Map<String, JsonValue>;

/// Trait for running SQL statements built by [`SqlStore`]
///
/// Implement it over whatever client the application uses; parameters are bound positionally
/// (`$1`, `$2`, ...) in the order of `values`.
///
/// Updates, deletes and relation reads bind key values as they were stored. Lookups by
/// [`Identity`] (`find_by_primary_key`) bind the normalized key instead, so a numeric-looking
/// string key arrives as a `BigInt` and a UUID as a `String`; executors over text or `uuid`
/// key columns must convert those parameters (or the statement must cast).
pub trait SqlExecutor {
    /// Execute a statement and return the number of rows affected
    fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, StoreError>;

    /// Execute a query and return every row as a column → value map
    fn query_all(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, StoreError>;
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &E {
    fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, StoreError> {
        (**self).execute(sql, values)
    }

    fn query_all(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, StoreError> {
        (**self).query_all(sql, values)
    }
}

/// Convert a JSON attribute value into a bound SQL value
pub fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Option::<String>::None.into(),
        JsonValue::Bool(b) => (*b).into(),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(u) = n.as_u64() {
                u.into()
            } else {
                n.as_f64().into()
            }
        }
        JsonValue::String(s) => s.clone().into(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.clone().into(),
    }
}

fn ident(name: &str) -> Alias {
    Alias::new(name.to_string())
}

fn column(table: &str, name: &str) -> Expr {
    Expr::col((ident(table), ident(name)))
}

/// `RelationStore` over a SQL database
#[derive(Debug)]
pub struct SqlStore<E> {
    schema: Schema,
    executor: E,
}

impl<E: SqlExecutor> SqlStore<E> {
    pub fn new(schema: Schema, executor: E) -> Self {
        Self { schema, executor }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    fn query(&self, query: &SelectStatement) -> Result<Vec<Row>, StoreError> {
        let (sql, values) = query.build(PostgresQueryBuilder);
        debug!("query: {sql}");
        self.executor.query_all(&sql, &values.0)
    }

    /// `SELECT * FROM target WHERE <link columns = owner values>`
    pub fn select_related(&self, owner: &Record, association: &Association) -> Option<SelectStatement> {
        let target = &association.target.name;
        let mut query = Query::select();
        query.column((ident(target), Asterisk)).from(ident(target));

        let conditions: &[(String, String)] = match &association.via {
            None => &association.link,
            Some(via) => {
                let mut on = Condition::all();
                for (target_column, junction_column) in &association.link {
                    on = on.add(join_condition(&via.table, junction_column, target, target_column));
                }
                query.join(JoinType::InnerJoin, ident(&via.table), on);
                &via.link
            }
        };
        let table = association.via.as_ref().map_or(target, |via| &via.table);
        for (far, near) in conditions {
            let value = owner.get(near).filter(|v| !v.is_null())?;
            query.and_where(column(table, far).eq(json_to_value(value)));
        }
        Some(query)
    }

    /// Condition on a normalized key; numeric-looking strings are bound as integers
    fn key_condition(
        model: &ModelSchema,
        key: &Identity,
    ) -> Condition {
        key.zip_columns(&model.primary_key)
            .fold(Condition::all(), |condition, (name, part)| {
                condition.add(Expr::col(ident(name)).eq(json_to_value(&part.to_json())))
            })
    }

    /// Condition on the key the row was stored under, bound with the stored JSON values
    fn stored_key_condition(model: &ModelSchema, entity: &Record) -> Result<Condition, StoreError> {
        let mut condition = Condition::all();
        for column in &model.primary_key {
            let value = entity
                .old_attribute(column)
                .or_else(|| entity.get(column))
                .filter(|value| KeyPart::from_json(value).is_some())
                .ok_or_else(|| StoreError::PrimaryKeyRequired(model.name.clone()))?;
            condition = condition.add(Expr::col(ident(column)).eq(json_to_value(value)));
        }
        Ok(condition)
    }

    fn insert(&self, entity: &mut Record) -> Result<(), StoreError> {
        let model = self.schema.model(entity.model())?;
        let fields = entity.dirty_attributes();
        if fields.is_empty() {
            return Err(StoreError::Other(format!("No fields to insert into '{}'", model.name)));
        }

        let mut query = InsertStatement::default();
        query.into_table(ident(&model.name));
        query.columns(fields.keys().map(|name| ident(name)));
        query
            .values(fields.values().map(|value| Expr::val(json_to_value(value))))
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        query.returning_all();

        let (sql, values) = query.build(PostgresQueryBuilder);
        debug!("insert: {sql}");
        let rows = self.executor.query_all(&sql, &values.0)?;
        if let Some(row) = rows.into_iter().next() {
            for (name, value) in row {
                entity.set(name, value);
            }
        }
        entity.mark_persisted();
        Ok(())
    }

    fn update(&self, entity: &mut Record) -> Result<(), StoreError> {
        let dirty = entity.dirty_attributes();
        if dirty.is_empty() {
            return Ok(());
        }
        let model = self.schema.model(entity.model())?;
        let condition = Self::stored_key_condition(model, entity)?;

        let mut query = UpdateStatement::default();
        query.table(ident(&model.name));
        for (name, value) in &dirty {
            query.value(ident(name), Expr::val(json_to_value(value)));
        }
        query.cond_where(condition);

        let (sql, values) = query.build(PostgresQueryBuilder);
        debug!("update: {sql}");
        if self.executor.execute(&sql, &values.0)? == 0 {
            return Err(StoreError::RecordNotFound(model.name.clone()));
        }
        entity.mark_persisted();
        Ok(())
    }

    fn delete(&self, entity: &mut Record) -> Result<(), StoreError> {
        let model = self.schema.model(entity.model())?;
        let condition = Self::stored_key_condition(model, entity)?;

        let mut query = DeleteStatement::default();
        query.from_table(ident(&model.name)).cond_where(condition);

        let (sql, values) = query.build(PostgresQueryBuilder);
        debug!("delete: {sql}");
        if self.executor.execute(&sql, &values.0)? == 0 {
            return Err(StoreError::RecordNotFound(model.name.clone()));
        }
        entity.mark_deleted();
        Ok(())
    }

    /// Condition matching the junction row between `owner` and `entity`
    fn junction_condition(
        owner: &Record,
        association: &Association,
        entity: &Record,
    ) -> Result<Condition, StoreError> {
        let row = junction_row(owner, association, entity).ok_or_else(|| {
            StoreError::Other(format!("'{}' is not a through association", association.target.name))
        })?;
        let mut condition = Condition::all();
        for (name, value) in &row {
            if value.is_null() {
                return Err(StoreError::PrimaryKeyRequired(association.target.name.clone()));
            }
            condition = condition.add(Expr::col(ident(name)).eq(json_to_value(value)));
        }
        Ok(condition)
    }
}

impl<E: SqlExecutor> RelationStore for SqlStore<E> {
    fn association(&self, owner: &Record, relation: &str) -> Result<Association, StoreError> {
        self.schema.association(owner.model(), relation).cloned()
    }

    fn find_related(&self, owner: &Record, relation: &str) -> Result<Vec<Record>, StoreError> {
        let association = self.schema.association(owner.model(), relation)?;
        // an owner without key values has nothing linked
        let Some(query) = self.select_related(owner, association) else {
            return Ok(Vec::new());
        };
        Ok(self
            .query(&query)?
            .into_iter()
            .map(|row| Record::persisted(&association.target, row))
            .collect())
    }

    fn find_by_primary_key(
        &self,
        model: &str,
        key: &Identity,
    ) -> Result<Option<Record>, StoreError> {
        let schema = self.schema.model(model)?;
        if key.arity() != schema.primary_key.len() {
            return Ok(None);
        }
        let mut query = Query::select();
        query
            .column(Asterisk)
            .from(ident(model))
            .cond_where(Self::key_condition(schema, key))
            .limit(1);
        Ok(self
            .query(&query)?
            .into_iter()
            .next()
            .map(|row| Record::persisted(schema, row)))
    }

    fn save(&self, entity: &mut Record) -> Result<(), StoreError> {
        if entity.is_new_record() {
            self.insert(entity)
        } else {
            self.update(entity)
        }
    }

    fn link(&self, owner: &Record, relation: &str, entity: &mut Record) -> Result<(), StoreError> {
        let association = self.schema.association(owner.model(), relation)?;
        let Some(via) = &association.via else {
            assign_foreign_key(owner, association, entity);
            return self.save(entity);
        };
        if entity.is_new_record() {
            self.save(entity)?;
        }
        let row = junction_row(owner, association, entity).unwrap_or_default();

        let mut query = InsertStatement::default();
        query.into_table(ident(&via.table));
        query.columns(row.keys().map(|name| ident(name)));
        query
            .values(row.values().map(|value| Expr::val(json_to_value(value))))
            .map_err(|e| StoreError::QueryError(e.to_string()))?;

        let (sql, values) = query.build(PostgresQueryBuilder);
        debug!("link: {sql}");
        self.executor.execute(&sql, &values.0)?;
        Ok(())
    }

    fn unlink(
        &self,
        owner: &Record,
        relation: &str,
        entity: &mut Record,
        cascade: bool,
    ) -> Result<(), StoreError> {
        let association = self.schema.association(owner.model(), relation)?;
        let Some(via) = &association.via else {
            if cascade {
                return self.delete(entity);
            }
            clear_foreign_key(association, entity);
            return self.save(entity);
        };

        let condition = Self::junction_condition(owner, association, entity)?;
        let (sql, values) = if cascade {
            let mut query = DeleteStatement::default();
            query.from_table(ident(&via.table)).cond_where(condition);
            query.build(PostgresQueryBuilder)
        } else {
            let mut query = UpdateStatement::default();
            query.table(ident(&via.table));
            let junction_columns = via
                .link
                .iter()
                .map(|(junction, _)| junction)
                .chain(association.link.iter().map(|(_, junction)| junction));
            for name in junction_columns {
                query.value(ident(name), Expr::val(Option::<String>::None));
            }
            query.cond_where(condition);
            query.build(PostgresQueryBuilder)
        };
        debug!("unlink: {sql}");
        self.executor.execute(&sql, &values.0)?;
        Ok(())
    }
}
