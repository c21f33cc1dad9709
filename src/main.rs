fn main() -> anyhow::Result<()> {
    ama_bakery_pos_lib::run()
}
