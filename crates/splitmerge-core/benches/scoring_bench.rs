use criterion::{Criterion, black_box, criterion_group, criterion_main};
use oorandom::Rand64;
use splitmerge_core::{
    Binarization, CategoryVocabulary, GrammarAccumulator, LexiconAccumulator, LexiconParams,
    TreeScorer, TreeSet, binarize, read_trees,
};

const TREEBANK: &str = "
(ROOT (S (NP (DT The) (JJ quick) (JJ brown) (NN fox)) (VP (VBZ jumps) (PP (IN over) (NP (DT the) (JJ lazy) (NN dog)))) (. .)))
(ROOT (S (NP (PRP He)) (VP (VBD said) (SBAR (IN that) (S (NP (DT the) (NN market)) (VP (VBD fell))))) (. .)))
(ROOT (S (NP (NNP Mary)) (VP (VBZ reads) (NP (DT a) (NN book)) (PP (IN in) (NP (DT the) (NN park)))) (. .)))
";

fn bench_scoring(c: &mut Criterion) {
    let raw: Vec<_> = read_trees(TREEBANK, "ROOT")
        .unwrap()
        .iter()
        .map(|t| binarize(t, 1, 0, Binarization::Right))
        .collect();
    let mut vocab = CategoryVocabulary::default();
    for tree in &raw {
        tree.for_each_category(&mut |l| {
            vocab.intern(l);
        });
    }
    let mut substates = vec![8; vocab.len()];
    substates[0] = 1;
    let mut trees = TreeSet::build(raw, &substates, &vocab).unwrap();

    let mut rng = Rand64::new(2);
    let mut grammar = GrammarAccumulator::new(&substates, 0, 1e-30);
    let mut lexicon = LexiconAccumulator::new(&substates, 0, LexiconParams::default());
    for tree in &trees {
        grammar.tally_uninitialized(tree);
        lexicon.tally_initial(tree, 1.0, None, false, 20.0, &mut rng);
    }
    let grammar = grammar.optimize(1.0, &mut rng);
    let lexicon = lexicon.optimize();
    let scorer = TreeScorer::new(&grammar, &lexicon);

    c.bench_function("score_inside_8_substates", |b| {
        b.iter(|| {
            for tree in trees.iter_mut() {
                scorer.score_inside(black_box(tree)).unwrap();
            }
        });
    });

    c.bench_function("score_inside_outside_8_substates", |b| {
        b.iter(|| {
            for tree in trees.iter_mut() {
                scorer.score_inside_outside(black_box(tree)).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
