use anyhow::Result;
use qudi_station::station::{self, parse_str, DependencyGraph, Validator};
use qudi_station::DiagnosticCode;
use std::path::PathBuf;

async fn warwick_graph() -> Result<DependencyGraph> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config/stations/warwick_rt_confocal.cfg");
    let station = station::load_file(path).await?;
    Ok(DependencyGraph::from_station(&station))
}

#[tokio::test]
async fn load_order_places_dependencies_first() -> Result<()> {
    let graph = warwick_graph().await?;
    let order = graph.load_order()?;
    assert_eq!(order.len(), 13);

    let position = |name: &str| order.iter().position(|m| m == name).unwrap();
    for (module, _role, target) in graph.edges() {
        assert!(
            position(&target) < position(&module),
            "{target} must come before {module}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn activation_of_one_gui_pulls_in_its_chain() -> Result<()> {
    let graph = warwick_graph().await?;
    assert_eq!(
        graph.activation_order("stepper")?,
        vec!["anc300", "stepperlogic", "stepper"]
    );
    assert_eq!(
        graph.activation_order("hbt")?,
        vec!["savelogic", "hbtlogic", "hbt"]
    );
    Ok(())
}

#[tokio::test]
async fn dependents_of_shared_logic() -> Result<()> {
    let graph = warwick_graph().await?;
    assert_eq!(
        graph.transitive_dependents("savelogic"),
        vec!["aomlogic", "counterlogic", "hbt", "hbtlogic"]
    );
    assert!(graph.can_remove("savelogic").is_err());
    assert!(graph.can_remove("hbt").is_ok());
    assert_eq!(graph.dependencies_of("aomlogic"), vec!["mynicard", "savelogic"]);
    Ok(())
}

#[tokio::test]
async fn dot_output_lists_labelled_edges() -> Result<()> {
    let dot = warwick_graph().await?.to_dot();
    assert!(dot.starts_with("digraph station {"));
    assert!(dot.contains("\"hbt\" -> \"hbtlogic\" [label=\"hbtlogic\"];"));
    assert!(dot.contains("\"tray\";"));
    Ok(())
}

#[test]
fn cycles_are_reported_with_their_members() {
    let station = parse_str(
        "\
logic:
    a:
        module.Class: 'x.A'
        connect:
            next: 'b'
    b:
        module.Class: 'x.B'
        connect:
            next: 'c'
    c:
        module.Class: 'x.C'
        connect:
            next: 'a'
    d:
        module.Class: 'x.D'
",
        None,
    )
    .unwrap();

    let err = DependencyGraph::from_station(&station).load_order().unwrap_err();
    assert_eq!(err.members, vec!["a", "b", "c"]);

    let report = Validator::new().validate(&station);
    let cycle = report.with_code(DiagnosticCode::DependencyCycle);
    assert_eq!(cycle.len(), 1);
    assert!(cycle[0].message.ends_with("a, b, c"));
    assert_eq!(cycle[0].line, Some(2));
}
