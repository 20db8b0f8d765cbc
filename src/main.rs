use nodegraph::{ChangeEvent, Graph, GraphConfig, ObserverError, Watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("nodegraph v{}", nodegraph::version());
    println!("==========================================");
    println!();

    // Optional YAML config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => GraphConfig::from_yaml_file(path)?,
        None => GraphConfig::default(),
    };
    let graph = Graph::from_config(config)?;

    demo_entity_lifecycle(&graph).await?;
    demo_cascade(&graph).await?;

    Ok(())
}

fn print_event(event: &ChangeEvent) -> Result<(), ObserverError> {
    let origin = if event.from_cloud { "cloud" } else { "local" };
    println!("  [{}] {} {}", origin, event.kind.event_type(), serde_json::to_string(&event.kind)?);
    Ok(())
}

async fn demo_entity_lifecycle(graph: &Graph) -> anyhow::Result<()> {
    println!("=== Demo 1: Entity lifecycle ===");
    let observer = graph.subscribe(print_event);
    graph.watch(observer, Watch::entity().types(["T"]))?;

    let node = graph.create_entity("T")?;
    node.set("P", 111);
    node.add_to_group("G");
    let report = graph.commit().await?;
    println!("✓ Saved: {}", serde_json::to_string(&report)?);

    node.set("P", 222);
    graph.commit().await?;
    println!("✓ Updated P to 222");

    node.delete();
    graph.commit().await?;
    println!("✓ Deleted; P is now {:?}", node.get("P"));

    graph.unsubscribe(observer);
    println!();
    Ok(())
}

async fn demo_cascade(graph: &Graph) -> anyhow::Result<()> {
    println!("=== Demo 2: Cascade delete ===");
    let alice = graph.create_entity("Person")?;
    alice.set("name", "Alice");
    let bob = graph.create_entity("Person")?;
    bob.set("name", "Bob");

    let meeting = graph.create_action("Meeting")?;
    meeting.add_subject(&alice);
    meeting.add_object(&bob);
    let knows = graph.create_relationship("knows", &bob, &alice)?;
    graph.commit().await?;
    println!("✓ Alice meets Bob; Bob knows Alice");

    alice.delete();
    let report = graph.commit().await?;
    println!("✓ Deleted Alice, removing {} node(s)", report.deleted.len());
    println!("  meeting live: {}", meeting.is_live());
    println!("  knows live:   {}", knows.is_live());
    println!("  bob live:     {}", bob.is_live());
    Ok(())
}
