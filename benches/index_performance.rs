use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use codelore::index::{CodeIndex, WorkspaceFile};
use codelore::indexer::ExtractorRegistry;
use codelore::knowledge::{KnowledgeStore, NewKnowledge};
use codelore::storage::{Scope, ScopeRegistry, ScopeSelector};

fn synthetic_module(i: usize) -> String {
    format!(
        "import {{ helper{prev} }} from './mod{prev}';\n\
         \n\
         export interface Record{i} {{\n  id: string;\n  value: number;\n}}\n\
         \n\
         export class Service{i} {{\n  private cache = new Map();\n\n  load(id: string) {{\n    return helper{prev}(id);\n  }}\n}}\n\
         \n\
         export function helper{i}(id: string) {{\n  return id.length + {i};\n}}\n\
         \n\
         export const LIMIT_{i} = {i};\n",
        i = i,
        prev = i.saturating_sub(1),
    )
}

fn synthetic_workspace(count: usize) -> Vec<WorkspaceFile> {
    (0..count)
        .map(|i| {
            let path = format!("src/mod{}.ts", i);
            WorkspaceFile::new(format!("/bench/{}", path), path).with_content(synthetic_module(i))
        })
        .collect()
}

fn new_index(dir: &TempDir) -> CodeIndex {
    let registry = Arc::new(ScopeRegistry::new(dir.path(), "bench"));
    CodeIndex::new(registry, Arc::new(ExtractorRegistry::with_defaults()))
}

/// Full and incremental workspace passes on file-backed storage
fn bench_index_workspace(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_workspace");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for count in [50, 200] {
        let files = synthetic_workspace(count);

        group.bench_with_input(BenchmarkId::new("full", count), &files, |b, files| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let index = new_index(&dir);
                black_box(index.index_workspace(files, false).unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("unchanged", count), &files, |b, files| {
            let dir = TempDir::new().unwrap();
            let index = new_index(&dir);
            index.index_workspace(files, false).unwrap();
            b.iter(|| black_box(index.index_workspace(files, true).unwrap()));
        });
    }

    group.finish();
}

fn bench_search_symbols(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_symbols");

    let dir = TempDir::new().unwrap();
    let index = new_index(&dir);
    index.index_workspace(&synthetic_workspace(500), false).unwrap();

    group.bench_function("exact_name", |b| {
        b.iter(|| black_box(index.search_symbols("helper250", &[], false, 20).unwrap()));
    });

    group.bench_function("prefix", |b| {
        b.iter(|| black_box(index.search_symbols("Serv", &[], true, 20).unwrap()));
    });

    group.bench_function("substring_fallback", |b| {
        b.iter(|| black_box(index.search_symbols("vice49", &[], false, 20).unwrap()));
    });

    group.finish();
}

fn bench_knowledge_retrieve(c: &mut Criterion) {
    let mut group = c.benchmark_group("knowledge_retrieve");

    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ScopeRegistry::new(dir.path(), "bench"));
    let store = KnowledgeStore::new(Arc::clone(&registry));
    for i in 0..1000 {
        let scope = Scope::ALL[i % Scope::ALL.len()];
        let input = NewKnowledge::new(format!(
            "Note {} about retry budgets and cache invalidation in service {}",
            i,
            i % 37
        ))
        .with_tags([format!("svc{}", i % 37)]);
        store.store(scope, input).unwrap();
    }

    group.bench_function("project_scope", |b| {
        b.iter(|| black_box(store.retrieve(ScopeSelector::One(Scope::Project), "retry budgets", &[], 20).unwrap()));
    });

    group.bench_function("all_scopes", |b| {
        b.iter(|| black_box(store.retrieve(ScopeSelector::All, "cache invalidation", &[], 20).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_index_workspace, bench_search_symbols, bench_knowledge_retrieve);
criterion_main!(benches);
