//! Integration tests for response parsing, column metadata and value
//! conversion
//!
//! These tests feed complete server responses through the parser and convert
//! their rows the way a result set does, without a MonetDB server.

use chrono::{NaiveDate, NaiveTime};
use monetdb_rs::messages::{Reply, Response};
use monetdb_rs::types::convert_text;
use monetdb_rs::{Decimal, Error, PreparedStatement, SqlType, Value};

const MIXED_TABLE: &str = "&1 3 2 6 2\n\
% sys.v,\tsys.v,\tsys.v,\tsys.v,\tsys.v,\tsys.v # table_name\n\
% id,\tname,\tprice,\tborn,\tflag,\tdoc # name\n\
% int,\tvarchar,\tdecimal,\tdate,\tboolean,\tjson # type\n\
% 1,\t5,\t6,\t10,\t5,\t9 # length\n\
% 32 0,\t5 0,\t9 2,\t0 0,\t1 0,\t0 0 # typesizes\n\
[ 1,\t\"ann\\tb\",\t12.50,\t1999-12-31,\ttrue,\t\"{\\\"k\\\": 1}\"\t]\n\
[ 2,\tNULL,\t-0.05,\tNULL,\tfalse,\tNULL\t]\n";

fn convert_rows(text: &str) -> Vec<Vec<Value>> {
    let response = Response::parse(text).unwrap();
    let table = response.first_table().unwrap();
    table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&table.columns)
                .map(|(raw, column)| convert_text(raw.as_deref(), column).unwrap())
                .collect()
        })
        .collect()
}

mod metadata_tests {
    use super::*;

    #[test]
    fn test_columns_from_metadata() {
        let response = Response::parse(MIXED_TABLE).unwrap();
        let table = response.first_table().unwrap();
        assert_eq!(table.id, 3);
        assert_eq!(table.row_count, 2);
        assert_eq!(table.columns.len(), 6);

        let price = &table.columns[2];
        assert_eq!(price.name, "price");
        assert_eq!(price.table_name, "sys.v");
        assert_eq!(price.sql_type, SqlType::Decimal);
        assert_eq!(price.length, Some(6));
        assert_eq!(price.precision, Some(9));
        assert_eq!(price.scale, Some(2));
    }

    #[test]
    fn test_metadata_width_must_match_columns() {
        let text = "&1 0 2 2 0\n% a # name\n% int,\tint # type\n";
        assert!(matches!(Response::parse(text), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_tuple_width_must_match_columns() {
        let text = "&1 0 1 2 1\n% a,\tb # name\n% int,\tint # type\n[ 1\t]\n";
        assert!(matches!(Response::parse(text), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_query_id_in_header() {
        let text = "&1 9 0 1 0 42\n% a # name\n% int # type\n";
        let response = Response::parse(text).unwrap();
        assert_eq!(response.first_table().unwrap().query_id, Some(42));
    }
}

mod conversion_tests {
    use super::*;

    #[test]
    fn test_mixed_row_values() {
        let rows = convert_rows(MIXED_TABLE);
        assert_eq!(rows[0][0], Value::Integer(1));
        assert_eq!(rows[0][1], Value::String("ann\tb".to_string()));
        assert_eq!(rows[0][2], Value::Decimal(Decimal::new(1250, 2)));
        assert_eq!(
            rows[0][3].as_date(),
            NaiveDate::from_ymd_opt(1999, 12, 31)
        );
        assert_eq!(rows[0][4].as_bool(), Some(true));
        assert_eq!(rows[0][5].as_json().unwrap()["k"], 1);
    }

    #[test]
    fn test_nulls_per_column() {
        let rows = convert_rows(MIXED_TABLE);
        assert!(rows[1][1].is_null());
        assert!(rows[1][3].is_null());
        assert!(rows[1][5].is_null());
        assert_eq!(rows[1][2].to_string(), "-0.05");
    }

    #[test]
    fn test_quoted_null_is_a_string() {
        let text = "&1 0 1 1 1\n% s # name\n% varchar # type\n[ \"NULL\"\t]\n";
        let rows = convert_rows(text);
        assert_eq!(rows[0][0], Value::String("NULL".to_string()));
    }

    #[test]
    fn test_sliceless_values() {
        let text = "&1 0 2 1 2\n% n # name\n% time # type\n=12:30:00\n=NULL\n";
        let rows = convert_rows(text);
        assert_eq!(
            rows[0][0],
            Value::Time(NaiveTime::from_hms_opt(12, 30, 0).unwrap())
        );
        assert!(rows[1][0].is_null());
    }

    #[test]
    fn test_unknown_type_passes_text() {
        let text = "&1 0 1 1 1\n% g # name\n% geometry # type\n[ POINT (1 2)\t]\n";
        let rows = convert_rows(text);
        assert_eq!(rows[0][0].as_str(), Some("POINT (1 2)"));
    }
}

mod prepare_tests {
    use super::*;

    const PREPARE: &str = "&5 4 3 6 3\n\
% .prepare,\t.prepare,\t.prepare,\t.prepare,\t.prepare,\t.prepare # table_name\n\
% type,\tdigits,\tscale,\tschema,\ttable,\tcolumn # name\n\
% varchar,\tint,\tint,\tvarchar,\tvarchar,\tvarchar # type\n\
% 7,\t2,\t1,\t0,\t1,\t5 # length\n\
% 0 0,\t32 0,\t32 0,\t0 0,\t0 0,\t0 0 # typesizes\n\
[ \"decimal\",\t9,\t2,\t\"sys\",\t\"p\",\t\"price\"\t]\n\
[ \"int\",\t32,\t0,\tNULL,\tNULL,\tNULL\t]\n\
[ \"decimal\",\t9,\t2,\tNULL,\tNULL,\tNULL\t]\n";

    fn prepared() -> PreparedStatement {
        let response = Response::parse(PREPARE).unwrap();
        match &response.replies[0] {
            Reply::Prepare(table) => PreparedStatement::from_reply(table).unwrap(),
            other => panic!("expected a prepare reply, got {:?}", other),
        }
    }

    #[test]
    fn test_columns_and_parameters_split() {
        let stmt = prepared();
        assert_eq!(stmt.id, 4);
        assert_eq!(stmt.columns.len(), 1);
        assert_eq!(stmt.columns[0].name, "price");
        assert_eq!(stmt.columns[0].table_name, "p");
        assert_eq!(stmt.columns[0].precision, Some(9));
        assert_eq!(stmt.columns[0].scale, Some(2));
        assert_eq!(stmt.parameter_count(), 2);
        assert_eq!(stmt.parameters[1].type_name, "decimal");
        assert_eq!(stmt.parameters[1].scale, 2);
    }

    #[test]
    fn test_execute_text() {
        let stmt = prepared();
        assert_eq!(stmt.execute_sql(&["7", "1.25"]), "EXECUTE 4(7, 1.25)");
        assert_eq!(stmt.execute_sql(&[]), "EXECUTE 4()");
    }
}
