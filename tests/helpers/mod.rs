//! Shared test fixtures: roster row builders for the pipeline tests.

use ottica::store::ClientRow;

pub fn make_client(id: &str, first: &str, last: &str, email: Option<&str>) -> ClientRow {
    ClientRow {
        id: id.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: email.map(|e| e.to_string()),
        ..ClientRow::default()
    }
}
