use repograph_graph::NodeKind;
use repograph_indexer::{Daemon, DaemonConfig};
use repograph_search::{assemble_node_context, search, ContextBuilder};
use repograph_store::DocumentStore;
use tempfile::TempDir;

const GREETER: &str = r#"import sys


class Greeter:
    def hello(self, name):
        return "hello " + name


def main():
    greeter = Greeter()
    print(greeter.hello(sys.argv[1]))
"#;

const CONFIG: &str = r#"def parse_config(path):
    with open(path) as handle:
        return handle.read()
"#;

async fn indexed() -> (TempDir, Daemon) {
    let temp = TempDir::new().expect("tempdir");
    tokio::fs::create_dir_all(temp.path().join("app"))
        .await
        .expect("create app");
    tokio::fs::write(temp.path().join("app/greeter.py"), GREETER)
        .await
        .expect("write greeter");
    tokio::fs::write(temp.path().join("app/config.py"), CONFIG)
        .await
        .expect("write config");
    let daemon = Daemon::open(temp.path(), DaemonConfig::default(), None)
        .await
        .expect("open");
    daemon.update(false).await.expect("update");
    (temp, daemon)
}

#[tokio::test]
async fn search_finds_chunks_of_the_current_graph() {
    let (_temp, daemon) = indexed().await;
    let graph = daemon.snapshot().await;

    let hits = search("parse config", &graph, daemon.store(), 3)
        .await
        .expect("search");
    assert_eq!(hits.len(), 3);
    assert!(hits[0].id.starts_with("app/config.py"));
    assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
    assert!(daemon.store().active_ids().await.is_empty());
}

#[tokio::test]
async fn method_context_quotes_its_class_and_caller() {
    let (_temp, daemon) = indexed().await;
    let graph = daemon.snapshot().await;

    let ctx = assemble_node_context(&graph, daemon.store(), "app/greeter.py:Greeter.hello", 500)
        .await
        .expect("context");
    assert_eq!(ctx.kind, NodeKind::Chunk);
    assert!(ctx.document.contains("return \"hello \" + name"));
    assert!(ctx.context.contains("class Greeter:"));
    assert!(ctx.context.contains("[called by, parent]"));
    assert!(ctx.context.contains("def main():"));
    assert!(!ctx.context.contains("return \"hello \""));
}

#[tokio::test]
async fn directory_context_lists_files() {
    let (_temp, daemon) = indexed().await;
    let graph = daemon.snapshot().await;

    let ctx = assemble_node_context(&graph, daemon.store(), "app", 500)
        .await
        .expect("context");
    assert_eq!(ctx.context, "app\n  app/config.py\n  app/greeter.py\n");
}

#[tokio::test]
async fn builder_quotes_line_refs() {
    let (_temp, daemon) = indexed().await;
    let graph = daemon.snapshot().await;

    let mut builder = ContextBuilder::new(&graph, daemon.store());
    builder
        .add("app/greeter.py:4-5", ["selection"])
        .await
        .expect("add");
    assert_eq!(
        builder.render(),
        "### app/greeter.py [selection]\nclass Greeter:\n    def hello(self, name):\n"
    );
}
