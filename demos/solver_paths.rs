use accelerated_pca::{FeatureVector, PartitionedVectors, PcaEstimator, RowMatrix, Solver};

fn main() {
    env_logger::init();

    let rows = vec![
        FeatureVector::sparse(5, vec![1, 3], vec![1.0, 7.0]).expect("valid sparse row"),
        FeatureVector::dense(vec![2.0, 0.0, 3.0, 4.0, 5.0]),
        FeatureVector::dense(vec![4.0, 0.0, 0.0, 6.0, 7.0]),
        FeatureVector::dense(vec![1.0, 2.0, 1.0, 0.5, 3.0]),
        FeatureVector::sparse(5, vec![0, 4], vec![3.0, 1.5]).expect("valid sparse row"),
        FeatureVector::dense(vec![0.5, 1.0, 2.0, 2.0, 0.0]),
    ];
    let data = PartitionedVectors::from_rows(rows, 2);
    let k = 3;

    let reference = RowMatrix::from_partitions(&data).expect("dense conversion failed");
    let (pc, ev) = reference
        .compute_principal_components_and_explained_variance(k)
        .expect("reference PCA failed");
    println!("reference");
    println!("  components:\n{:.6}", pc);
    println!("  explained variance: {:.6}", ev);

    for solver in Solver::ALL {
        let model = PcaEstimator::new()
            .with_k(k)
            .with_solver(solver)
            .fit(&data)
            .expect("PCA fit failed");
        println!("{}", solver);
        println!("  components:\n{:.6}", model.pc());
        println!("  explained variance: {:.6}", model.explained_variance());
    }
}
