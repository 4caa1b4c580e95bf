/// Relational schema for the IR store. The CHECK and UNIQUE constraints
/// mirror the application-side validation: a bundle that slips past one
/// layer is still rejected by the other.
///
/// The indices exist to keep the report queries sub-linear in corpus
/// size; they are part of the contract, not an optimization to revisit.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id          TEXT PRIMARY KEY,
    started_at      TEXT NOT NULL,
    finished_at     TEXT,
    status          TEXT NOT NULL
                    CHECK (status IN ('running', 'ok', 'partial', 'failed')),
    source_version  TEXT
);

CREATE TABLE IF NOT EXISTS objects (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    kind            TEXT NOT NULL
                    CHECK (kind IN ('screen', 'user_object', 'menu', 'data_window',
                                    'function', 'script', 'library', 'sql', 'table')),
    name            TEXT NOT NULL,
    module          TEXT,
    source_path     TEXT,
    UNIQUE (run_id, kind, name)
);

CREATE TABLE IF NOT EXISTS events (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    object_id       INTEGER NOT NULL REFERENCES objects (id),
    event_name      TEXT NOT NULL,
    script_ref      TEXT
);

CREATE TABLE IF NOT EXISTS functions (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    object_id       INTEGER NOT NULL REFERENCES objects (id),
    function_name   TEXT NOT NULL,
    signature       TEXT
);

CREATE TABLE IF NOT EXISTS data_windows (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    object_id       INTEGER NOT NULL REFERENCES objects (id),
    dw_name         TEXT NOT NULL,
    base_table      TEXT,
    sql_select      TEXT,
    UNIQUE (run_id, object_id, dw_name)
);

CREATE TABLE IF NOT EXISTS sql_statements (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    owner_id        INTEGER NOT NULL REFERENCES objects (id),
    sql_kind        TEXT NOT NULL
                    CHECK (sql_kind IN ('SELECT', 'INSERT', 'UPDATE', 'DELETE', 'MERGE', 'OTHER')),
    sql_text_norm   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sql_tables (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    sql_id          INTEGER NOT NULL REFERENCES sql_statements (id),
    table_name      TEXT NOT NULL,
    rw_type         TEXT NOT NULL CHECK (rw_type IN ('READ', 'WRITE'))
);

CREATE TABLE IF NOT EXISTS relations (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs (run_id),
    src_id          INTEGER NOT NULL REFERENCES objects (id),
    dst_id          INTEGER NOT NULL REFERENCES objects (id),
    relation_type   TEXT NOT NULL
                    CHECK (relation_type IN ('calls', 'opens', 'uses_dw', 'reads_table',
                                             'writes_table', 'triggers_event')),
    confidence      REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0)
);

CREATE INDEX IF NOT EXISTS idx_objects_key ON objects (run_id, kind, name);
CREATE INDEX IF NOT EXISTS idx_events_object ON events (run_id, object_id);
CREATE INDEX IF NOT EXISTS idx_functions_object ON functions (run_id, object_id);
CREATE INDEX IF NOT EXISTS idx_data_windows_object ON data_windows (run_id, object_id);
CREATE INDEX IF NOT EXISTS idx_sql_statements_owner ON sql_statements (run_id, owner_id);
CREATE INDEX IF NOT EXISTS idx_sql_tables_name ON sql_tables (table_name);
CREATE INDEX IF NOT EXISTS idx_relations_edge ON relations (relation_type, src_id, dst_id);
";
