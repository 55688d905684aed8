//! Parameter binding for MySQL statements.

use crate::models::Param;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::types::Json;

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &'q Param,
) -> Query<'q, MySql, MySqlArguments> {
    match param {
        Param::Null => query.bind(None::<String>),
        Param::Bool(v) => query.bind(*v),
        Param::Int(v) => query.bind(*v),
        Param::UInt(v) => query.bind(*v),
        Param::Float(v) => query.bind(*v),
        Param::String(v) => query.bind(v.as_str()),
        Param::Bytes(v) => query.bind(v.as_slice()),
        Param::Json(v) => query.bind(Json(v)),
    }
}

/// Prepare `sql` with every parameter bound in order.
pub(crate) fn bind_all<'q>(sql: &'q str, params: &'q [Param]) -> Query<'q, MySql, MySqlArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_mysql_param(query, param))
}
