use branch_mesh::{write_obj, TreeConfig};

fn config() -> TreeConfig {
    TreeConfig::from_toml(include_str!("../assets/tree.toml")).unwrap()
}

#[test]
fn bundled_config_builds_a_mesh() {
    let (tree, mesh) = config().build().unwrap();
    assert!(tree.branch_count() > 1);
    assert!(mesh.vertex_count() > 0);
    assert!(mesh.triangle_count() > 0);
    for i in 0..mesh.triangle_count() {
        assert!(mesh.triangle(i).iter().all(|&v| v < mesh.vertex_count()));
    }
}

#[test]
fn same_seed_same_mesh() {
    let (_, a) = config().build().unwrap();
    let (_, b) = config().build().unwrap();
    assert_eq!(a.vertex_count(), b.vertex_count());
    assert_eq!(a.triangle_count(), b.triangle_count());
    for i in 0..a.vertex_count() {
        assert_eq!(a.point(i), b.point(i));
    }
}

#[test]
fn obj_file_lists_every_vertex_and_face() {
    let (_, mesh) = config().build().unwrap();
    let path = std::env::temp_dir().join(format!("branch-mesh-{}.obj", std::process::id()));
    write_obj(&mesh, &path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let count = |prefix: &str| content.lines().filter(|l| l.starts_with(prefix)).count();
    assert_eq!(count("v "), mesh.vertex_count());
    assert_eq!(count("vn "), mesh.vertex_count());
    assert_eq!(count("vt "), mesh.vertex_count());
    assert_eq!(count("f "), mesh.triangle_count());
}
