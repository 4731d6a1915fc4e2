// Shared fixtures for dbman integration tests
//
// Builds a local content root with a three release plan:
//
//   plan.json
//   r{k}/manifest.json
//   r{k}/cmd/{create,schema,drop,alter}.sql
//   r{k}/qry/history.sql

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

pub const RELEASES: &[(&str, &str)] = &[("1.0", "1"), ("2.0", "2"), ("3.0", "3")];

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn manifest(k: usize, db_version: &str) -> serde_json::Value {
    json!({
        "dbVersion": db_version,
        "description": format!("release {}", k),
        "commandsPath": "cmd",
        "queriesPath": "qry",
        "dbProvider": "memory",
        "commands": [
            {
                "name": format!("create-db-{}", k),
                "asAdmin": true,
                "scripts": [
                    {
                        "name": "create database",
                        "file": "create.sql",
                        "vars": [ { "name": "DB_NAME", "fromConf": "Db.Name" } ]
                    }
                ]
            },
            {
                "name": format!("deploy-{}", k),
                "transactional": true,
                "useDb": true,
                "scripts": [
                    {
                        "name": "schema",
                        "file": "schema.sql",
                        "vars": [ { "name": "VERSION", "fromContext": "appVersion" } ]
                    }
                ]
            },
            {
                "name": format!("prepare-{}", k),
                "useDb": true,
                "scripts": [ { "name": "drop", "file": "drop.sql" } ]
            },
            {
                "name": format!("alter-{}", k),
                "transactional": true,
                "useDb": true,
                "scripts": [ { "name": "alter", "file": "alter.sql" } ]
            }
        ],
        "create": { "commands": [ format!("create-db-{}", k) ] },
        "deploy": { "commands": [ format!("deploy-{}", k) ] },
        "upgrade": {
            "prepare": format!("prepare-{}", k),
            "alter": format!("alter-{}", k),
            "deploy": format!("deploy-{}", k)
        },
        "queries": [
            {
                "name": "history",
                "description": "Version history",
                "file": "history.sql",
                "vars": [ { "name": "LIMIT", "fromInput": "limit" } ]
            }
        ]
    })
}

/// A content root holding `releases`, in plan order
pub fn content_root_with(releases: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let plan: Vec<_> = releases
        .iter()
        .enumerate()
        .map(|(i, (app, db))| json!({ "appVersion": app, "dbVersion": db, "path": format!("r{}", i + 1) }))
        .collect();
    write(root, "plan.json", &json!({ "releases": plan }).to_string());

    for (i, (_, db)) in releases.iter().enumerate() {
        let k = i + 1;
        let dir = format!("r{}", k);
        write(root, &format!("{}/manifest.json", dir), &manifest(k, db).to_string());
        write(root, &format!("{}/cmd/create.sql", dir), "CREATE DATABASE {{DB_NAME}};");
        write(root, &format!("{}/cmd/schema.sql", dir), "-- schema for {{VERSION}}");
        write(root, &format!("{}/cmd/drop.sql", dir), &format!("-- drop release {} objects", k));
        write(root, &format!("{}/cmd/alter.sql", dir), &format!("-- alter to {}", db));
        write(root, &format!("{}/qry/history.sql", dir), "SELECT * FROM version LIMIT {{LIMIT}}");
    }
    temp
}

pub fn content_root() -> TempDir {
    content_root_with(RELEASES)
}
