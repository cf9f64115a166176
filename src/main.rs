fn main() {
    inscribe_lib::run()
}
