fn main() {
    frog_chorus::run();
}
