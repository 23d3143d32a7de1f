// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Database schema definitions for the store index.

/// Store object layer: paths, objects, references.
pub const SCHEMA_SQL: &str = r#"
create table if not exists paths (
    id   integer primary key autoincrement not null,
    path text unique not null
);

create table if not exists objects (
    id     integer primary key not null,
    nar_size integer not null check (nar_size > 0),
    nar_hash text not null,
    ca       text,
    deriver  integer,
    foreign key (id) references paths(id) on delete cascade,
    foreign key (deriver) references paths(id) on delete set null
);

create table if not exists "references" (
    referrer  integer not null,
    reference integer not null,
    primary key (referrer, reference),
    foreign key (referrer) references objects(id) on delete cascade,
    foreign key (reference) references objects(id) on delete restrict
);

create index if not exists index_references_reference on "references"(reference);

create trigger if not exists delete_self_references before delete on objects
  begin
    delete from "references" where referrer = old.id and reference = old.id;
  end;
"#;

/// Derivation realizer: drv_hashes, realizations, reference_classes, signatures.
pub const REALIZER_SCHEMA_SQL: &str = r#"
create table if not exists drv_hashes (
    id        integer primary key autoincrement not null,
    algorithm text not null,
    bits      text not null,
    unique (algorithm, bits)
);

create table if not exists realizations (
    drv_hash    integer not null,
    output_name text not null default 'out',
    output_path integer not null,
    primary key (drv_hash, output_name, output_path),
    foreign key (drv_hash) references drv_hashes(id) on delete cascade,
    foreign key (output_path) references objects(id) on delete cascade
);

create index if not exists index_realizations_output on realizations(output_path);

create table if not exists reference_classes (
    id                     integer primary key autoincrement not null,
    referrer               integer not null,
    referrer_drv_hash      integer not null,
    referrer_output_name   text not null,
    reference              integer not null,
    reference_drv_hash     integer,
    reference_output_name  text,
    foreign key (referrer) references objects(id) on delete cascade,
    foreign key (reference) references objects(id) on delete restrict,
    foreign key (referrer_drv_hash) references drv_hashes(id) on delete cascade,
    foreign key (reference_drv_hash) references drv_hashes(id) on delete restrict,
    check (
        (reference_drv_hash is null and reference_output_name is null)
        or (reference_drv_hash is not null and reference_output_name is not null)
    )
);

create index if not exists index_reference_classes_referrer on reference_classes(referrer_drv_hash, referrer_output_name);
create index if not exists index_reference_classes_reference on reference_classes(reference);

create table if not exists signature_public_keys (
    id         integer primary key autoincrement not null,
    format     text not null,
    public_key blob not null,
    unique (format, public_key)
);

create table if not exists signatures (
    id            integer primary key autoincrement not null,
    drv_hash      integer not null,
    output_name   text not null,
    output_path   integer not null,
    public_key_id integer,
    signature     blob,
    foreign key (drv_hash, output_name, output_path) references realizations(drv_hash, output_name, output_path) on delete cascade,
    foreign key (public_key_id) references signature_public_keys(id) on delete set null
);
"#;

/// Build scheduler bookkeeping: builds, build_results, build_outputs, build_logs.
pub const BUILD_SCHEMA_SQL: &str = r#"
create table if not exists builds (
    id             integer primary key autoincrement not null,
    uuid           text unique not null,
    started_at     integer not null,
    ended_at       integer,
    internal_error text,
    expand_builder text,
    expand_args    text,
    expand_env     text
);

create table if not exists build_results (
    id                integer primary key autoincrement not null,
    build_id          integer not null,
    drv_path          text not null,
    status            text not null check (status in ('active','success','fail','error')),
    started_at        integer not null,
    builder_started_at integer,
    builder_ended_at   integer,
    ended_at          integer,
    drv_hash          integer,
    unique (build_id, drv_path),
    foreign key (build_id) references builds(id) on delete cascade,
    foreign key (drv_hash) references drv_hashes(id) on delete set null
);

create table if not exists build_outputs (
    result_id   integer not null,
    output_name text not null,
    output_path text not null,
    primary key (result_id, output_name),
    foreign key (result_id) references build_results(id) on delete cascade
);

create table if not exists build_logs (
    id          integer primary key autoincrement not null,
    result_id   integer not null,
    seq         integer not null check (seq >= 1),
    received_at integer not null,
    data        blob not null check (length(data) > 0),
    unique (result_id, seq),
    foreign key (result_id) references build_results(id) on delete cascade
);

create index if not exists index_build_logs_result on build_logs(result_id, seq);
"#;

/// Schema version for the zb store index.
pub const SCHEMA_VERSION: i32 = 1;
